//! Registry query generation from an email domain.

use serde::Serialize;

use crate::config::RegistryConfig;
use crate::domain_utils::{domain_of_email, DomainParts, SuffixTable};

/// Query templates with `{variant}` and `{country}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplates {
    pub country: String,
    pub generic: String,
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self {
            country: "country.country_code:{country} AND links:{variant}".to_string(),
            generic: "links:{variant}".to_string(),
        }
    }
}

impl QueryTemplates {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            country: config.country_query_template.clone(),
            generic: config.generic_query_template.clone(),
        }
    }

    fn render(&self, variant: &str, country: Option<&str>) -> String {
        match country {
            Some(code) => self
                .country
                .replace("{country}", &code.to_uppercase())
                .replace("{variant}", variant),
            None => self.generic.replace("{variant}", variant),
        }
    }
}

/// A single registry query and the domain variant it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryQuery {
    pub variant: String,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct QueryGenerator {
    suffixes: SuffixTable,
    templates: QueryTemplates,
}

impl QueryGenerator {
    pub fn new(suffixes: SuffixTable, templates: QueryTemplates) -> Self {
        Self { suffixes, templates }
    }

    /// Build one query per distinct domain variant, fewest dots first.
    ///
    /// Internationalized labels are queried in their Unicode form, which is
    /// how registry links spell them.
    pub fn generate(&self, email: &str) -> Vec<RegistryQuery> {
        let parts = self.suffixes.decompose(&domain_of_email(email));
        let country = parts
            .top_level()
            .filter(|tld| self.suffixes.is_country_code(tld));

        domain_variants(&parts)
            .into_iter()
            .map(|variant| unicode_variant(&variant))
            .map(|variant| RegistryQuery {
                query: self.templates.render(&variant, country),
                variant,
            })
            .collect()
    }

    /// Query strings only
    pub fn queries(&self, email: &str) -> Vec<String> {
        self.generate(email).into_iter().map(|q| q.query).collect()
    }
}

/// Every contiguous label chain worth asking the registry about.
///
/// Variants are generated walking from the registrable label outwards, then
/// deduplicated and stable-sorted by dot count, so broader labels come before
/// narrower ones within the same dot count.
pub fn domain_variants(parts: &DomainParts) -> Vec<String> {
    let mut labels: Vec<&str> = parts.subdomain_chain.iter().map(String::as_str).collect();
    labels.push(parts.registrable_domain.as_str());
    let n = labels.len();

    let mut variants: Vec<String> = Vec::new();
    let mut push = |variant: String| {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    };

    for i in (0..n).rev() {
        push(labels[i..].join("."));
        if i + 1 < n {
            push(labels[i..n - 1].join("."));
        }
    }
    for label in labels.iter().rev() {
        push(label.to_string());
    }

    variants.sort_by_key(|v| v.matches('.').count());
    variants
}

/// Punycode labels decoded to Unicode; anything that fails to decode is kept as is
fn unicode_variant(variant: &str) -> String {
    match idna::domain_to_unicode(variant) {
        (unicode, Ok(())) => unicode,
        (_, Err(_)) => variant.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> QueryGenerator {
        QueryGenerator::new(SuffixTable::bundled(), QueryTemplates::default())
    }

    #[test]
    fn test_single_variant_without_subdomain() {
        let queries = generator().queries("someone@example.com");
        assert_eq!(queries, vec!["links:example".to_string()]);
    }

    #[test]
    fn test_country_scoped_queries() {
        let generated = generator().generate("a@mail.dept.example.ac.uk");
        let variants: Vec<&str> = generated.iter().map(|q| q.variant.as_str()).collect();
        assert_eq!(
            variants,
            vec!["example", "dept", "mail", "dept.example", "mail.dept", "mail.dept.example"]
        );
        assert_eq!(
            generated[0].query,
            "country.country_code:UK AND links:example"
        );
        assert!(generated
            .iter()
            .all(|q| q.query.starts_with("country.country_code:UK AND links:")));
    }

    #[test]
    fn test_generic_template_for_non_country_suffix() {
        let queries = generator().queries("x@cs.example.edu");
        assert_eq!(
            queries,
            vec!["links:example", "links:cs", "links:cs.example"]
        );
    }

    #[test]
    fn test_variants_are_deduplicated() {
        let parts = DomainParts {
            subdomain_chain: vec!["lab".to_string(), "lab".to_string()],
            registrable_domain: "lab".to_string(),
            public_suffix: "org".to_string(),
        };
        let variants = domain_variants(&parts);
        assert_eq!(variants, vec!["lab", "lab.lab", "lab.lab.lab"]);
    }

    #[test]
    fn test_malformed_email_still_yields_a_query() {
        let queries = generator().queries("not-an-email");
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0], "links:not-an-email");

        let empty = generator().queries("");
        assert_eq!(empty, vec!["links:".to_string()]);
    }

    #[test]
    fn test_custom_templates() {
        let templates = QueryTemplates {
            country: "cc={country};q={variant}".to_string(),
            generic: "q={variant}".to_string(),
        };
        let generator = QueryGenerator::new(SuffixTable::bundled(), templates);
        assert_eq!(generator.queries("a@uni.de"), vec!["cc=DE;q=uni".to_string()]);
    }

    #[test]
    fn test_internationalized_labels_are_queried_in_unicode() {
        let generated = generator().generate("a@informatik.münchen.de");
        let variants: Vec<&str> = generated.iter().map(|q| q.variant.as_str()).collect();
        assert_eq!(variants, vec!["münchen", "informatik", "informatik.münchen"]);
        assert_eq!(generated[0].query, "country.country_code:DE AND links:münchen");

        let from_punycode = generator().queries("a@informatik.xn--mnchen-3ya.de");
        assert_eq!(from_punycode, generator().queries("a@informatik.münchen.de"));
    }

    #[test]
    fn test_plain_ascii_variants_are_untouched() {
        assert_eq!(unicode_variant("cs.example"), "cs.example");
        assert_eq!(unicode_variant(""), "");
    }
}
