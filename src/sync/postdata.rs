/// Builds a `key=value&key=value...` percent-encoded form body, in append order.
///
/// Mirrors the original's `postdata_t`, which leaned on `curl_easy_escape` for
/// the encoding; `urlencoding` covers the same `application/x-www-form-urlencoded`
/// semantics here.
#[derive(Debug, Default)]
pub struct PostData {
    parts: Vec<String>,
}

impl PostData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.parts.push(format!(
            "{}={}",
            urlencoding::encode(name),
            urlencoding::encode(value)
        ));
    }

    pub fn into_string(self) -> String {
        self.parts.join("&")
    }
}

/// Parse a `key=value&key=value...` response body as the server sends it back
/// (unescaped — the original never decodes these, it just re-echoes them
/// verbatim into the next request's postdata).
pub fn parse_response_parts(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ordered_form_body() {
        let mut pd = PostData::new();
        pd.append("clientMode", "standard");
        pd.append("os", "fitbitd-linux");
        assert_eq!(pd.into_string(), "clientMode=standard&os=fitbitd-linux");
    }

    #[test]
    fn escapes_reserved_characters() {
        let mut pd = PostData::new();
        pd.append("opResponse[0]", "a+b=c");
        assert_eq!(pd.into_string(), "opResponse%5B0%5D=a%2Bb%3Dc");
    }

    #[test]
    fn parses_response_parts_in_order() {
        let parts = parse_response_parts("trackerPublicId=abc&userPublicId=def");
        assert_eq!(
            parts,
            vec![
                ("trackerPublicId".to_string(), "abc".to_string()),
                ("userPublicId".to_string(), "def".to_string()),
            ]
        );
    }
}
