//! Verification id, link, and token extraction from free text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExtractionError;

static VERIFICATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)verificationId=([a-f0-9]{24})").unwrap());

/// Token patterns, most specific first.
static TOKEN_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)emailToken=([A-Za-z0-9]+)").unwrap(),
        Regex::new(r"(?i)[?&]token=([A-Za-z0-9]+)").unwrap(),
    ]
});

const TOKEN_PARAM: &str = "emailtoken=";

/// Pull the 24-hex-character verification id out of a URL or message.
pub fn extract_verification_id(text: &str) -> Option<String> {
    VERIFICATION_ID
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pull a bare email token out of text, trying the named parameter first.
pub fn extract_token(text: &str) -> Option<String> {
    TOKEN_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Rebuild a verification link from the original URL's base, the id, and a token.
pub fn build_link(original_url: &str, verification_id: &str, token: &str) -> String {
    let base = original_url.split('?').next().unwrap_or(original_url);
    format!("{base}?verificationId={verification_id}&emailToken={token}")
}

fn has_token_param(link: &str) -> bool {
    link.to_ascii_lowercase().contains(TOKEN_PARAM)
}

/// Finds verification links under a fixed service prefix.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    /// Ordered: link carrying a token parameter, then any link under the prefix.
    patterns: [Regex; 2],
}

impl LinkExtractor {
    pub fn new(service_url: &str) -> Result<Self, regex::Error> {
        let prefix = regex::escape(service_url);
        Ok(Self {
            patterns: [
                Regex::new(&format!(r"({prefix}[^\s\)]+\?[^\s\)]*emailToken=[^\s\)]+)"))?,
                Regex::new(&format!(r"({prefix}[^\s\)]+)"))?,
            ],
        })
    }

    /// First link match, with trailing markup artifacts stripped.
    pub fn extract_link(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|re| {
            re.captures(text).and_then(|c| c.get(1)).map(|m| {
                m.as_str()
                    .trim_end_matches(['<', '>', '"', '\'', ')'])
                    .to_string()
            })
        })
    }

    /// Full fallback chain: link with token, else token plus reconstruction.
    pub fn resolve(
        &self,
        body: &str,
        original_url: &str,
        verification_id: &str,
    ) -> Result<String, ExtractionError> {
        if let Some(link) = self.extract_link(body).filter(|l| has_token_param(l)) {
            return Ok(link);
        }

        tracing::debug!("Link incomplete or missing, falling back to token extraction");
        extract_token(body)
            .map(|token| build_link(original_url, verification_id, &token))
            .ok_or(ExtractionError::NoToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "deadbeefdeadbeefdeadbeef";

    fn extractor() -> LinkExtractor {
        LinkExtractor::new("https://svc.example.com/verify/").unwrap()
    }

    #[test]
    fn verification_id_is_exact_24_hex_match() {
        let url = format!("https://svc.example.com/verify/abc/?verificationId={ID}&x=1");
        assert_eq!(extract_verification_id(&url).as_deref(), Some(ID));
    }

    #[test]
    fn verification_id_takes_only_first_24_chars() {
        let url = format!("verificationId={ID}ff");
        assert_eq!(extract_verification_id(&url).as_deref(), Some(ID));
    }

    #[test]
    fn verification_id_rejects_short_or_non_hex() {
        assert!(extract_verification_id("verificationId=deadbeef").is_none());
        assert!(extract_verification_id("verificationId=zzzzzzzzzzzzzzzzzzzzzzzz").is_none());
        assert!(extract_verification_id(ID).is_none(), "parameter name is required");
    }

    #[test]
    fn verification_id_parameter_is_case_insensitive() {
        let url = format!("VERIFICATIONID={}", ID.to_uppercase());
        assert_eq!(extract_verification_id(&url), Some(ID.to_uppercase()));
    }

    #[test]
    fn build_link_replaces_query() {
        assert_eq!(
            build_link("https://svc/verify/abc?x=1", ID, "tok123"),
            "https://svc/verify/abc?verificationId=deadbeefdeadbeefdeadbeef&emailToken=tok123"
        );
    }

    #[test]
    fn build_link_without_query() {
        assert_eq!(
            build_link("https://svc/verify/abc", ID, "t"),
            format!("https://svc/verify/abc?verificationId={ID}&emailToken=t")
        );
    }

    #[test]
    fn token_prefers_named_parameter() {
        let text = "see ?token=generic and emailToken=named123";
        assert_eq!(extract_token(text).as_deref(), Some("named123"));
    }

    #[test]
    fn token_falls_back_to_generic_parameter() {
        assert_eq!(
            extract_token("https://x.test/a?b=1&token=Abc9").as_deref(),
            Some("Abc9")
        );
        assert!(extract_token("no tokens here").is_none());
    }

    #[test]
    fn link_with_token_is_preferred_and_trimmed() {
        let body = "Click <https://svc.example.com/verify/abc/?verificationId=1&emailToken=XYZ>\n\
                    or https://svc.example.com/verify/other";
        assert_eq!(
            extractor().extract_link(body).as_deref(),
            Some("https://svc.example.com/verify/abc/?verificationId=1&emailToken=XYZ")
        );
    }

    #[test]
    fn bare_link_is_second_choice() {
        let body = "(https://svc.example.com/verify/abc/)";
        assert_eq!(
            extractor().extract_link(body).as_deref(),
            Some("https://svc.example.com/verify/abc/")
        );
    }

    #[test]
    fn resolve_rebuilds_from_token_when_link_lacks_it() {
        let body = "Go to https://svc.example.com/verify/abc/ and enter code emailToken=T0K";
        let link = extractor()
            .resolve(body, "https://svc.example.com/verify/abc/?foo=1", ID)
            .unwrap();
        assert_eq!(
            link,
            format!("https://svc.example.com/verify/abc/?verificationId={ID}&emailToken=T0K")
        );
    }

    #[test]
    fn resolve_fails_without_token() {
        let err = extractor()
            .resolve("Thanks for signing up!", "https://svc.example.com/verify/abc/", ID)
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoToken);
    }
}
