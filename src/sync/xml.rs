use roxmltree::Document;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to parse response XML: {0}")]
    Parse(#[from] roxmltree::Error),
}

/// The `<response host= path= port= secure=>...</response>` element telling
/// the client where to POST the next request in the dialog, and carrying the
/// key=value body to feed back in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerRedirect {
    pub url: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOp {
    pub encrypted: bool,
    pub op_code_b64: String,
    pub payload_b64: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub redirect: ServerRedirect,
    pub remote_ops: Vec<RemoteOp>,
}

/// Parse a `fitbitClient` upload-response document.
pub fn parse_sync_response(xml: &str) -> Result<SyncResponse, XmlError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    let mut redirect = ServerRedirect::default();
    if let Some(resp) = find_child(root, "response") {
        let host = resp.attribute("host");
        let path = resp.attribute("path");
        if let (Some(host), Some(path)) = (host, path) {
            let secure = resp
                .attribute("secure")
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            let scheme = if secure { "https" } else { "http" };
            let port = resp
                .attribute("port")
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            redirect.url = Some(format!("{scheme}://{host}{port}{path}"));
        }
        let text: String = resp.text().unwrap_or("").trim().to_string();
        if !text.is_empty() {
            redirect.body = Some(text);
        }
    }

    let mut remote_ops = Vec::new();
    if let Some(ops_node) = find_descendant(root, "remoteOps") {
        for op in ops_node.children().filter(|n| n.is_element() && n.has_tag_name("remoteOp")) {
            let encrypted = op
                .attribute("encrypted")
                .map(|s| !s.eq_ignore_ascii_case("false"))
                .unwrap_or(false);

            let Some(op_code_b64) = find_child(op, "opCode").and_then(|n| n.text()) else {
                continue;
            };
            if op_code_b64.is_empty() {
                continue;
            }

            let payload_b64 = find_child(op, "payloadData")
                .and_then(|n| n.text())
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            remote_ops.push(RemoteOp {
                encrypted,
                op_code_b64: op_code_b64.to_string(),
                payload_b64,
            });
        }
    }

    Ok(SyncResponse { redirect, remote_ops })
}

fn find_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.descendants().find(|n| n.is_element() && n.has_tag_name(tag))
}

fn find_descendant<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    find_child(node, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_redirect_and_response_body() {
        let xml = r#"<fitbitClient>
            <response host="client.fitbit.com" path="/sync" secure="true">trackerPublicId=abc123</response>
        </fitbitClient>"#;
        let resp = parse_sync_response(xml).unwrap();
        assert_eq!(resp.redirect.url.as_deref(), Some("https://client.fitbit.com/sync"));
        assert_eq!(resp.redirect.body.as_deref(), Some("trackerPublicId=abc123"));
        assert!(resp.remote_ops.is_empty());
    }

    #[test]
    fn parses_non_secure_redirect_with_explicit_port() {
        let xml = r#"<fitbitClient>
            <response host="127.0.0.1" path="/sync" port="8080"></response>
        </fitbitClient>"#;
        let resp = parse_sync_response(xml).unwrap();
        assert_eq!(resp.redirect.url.as_deref(), Some("http://127.0.0.1:8080/sync"));
    }

    #[test]
    fn parses_remote_ops_with_and_without_payload() {
        let xml = r#"<fitbitClient>
            <device>
                <remoteOps>
                    <remoteOp encrypted="false">
                        <opCode>JCAAAAAA</opCode>
                    </remoteOp>
                    <remoteOp encrypted="true">
                        <opCode>IwAAAEA=</opCode>
                        <payloadData>AAECAw==</payloadData>
                    </remoteOp>
                </remoteOps>
            </device>
        </fitbitClient>"#;
        let resp = parse_sync_response(xml).unwrap();
        assert_eq!(resp.remote_ops.len(), 2);
        assert!(!resp.remote_ops[0].encrypted);
        assert!(resp.remote_ops[0].payload_b64.is_none());
        assert!(resp.remote_ops[1].encrypted);
        assert_eq!(resp.remote_ops[1].payload_b64.as_deref(), Some("AAECAw=="));
    }

    #[test]
    fn skips_remote_op_with_missing_opcode() {
        let xml = r#"<fitbitClient>
            <device><remoteOps><remoteOp><payloadData>AA==</payloadData></remoteOp></remoteOps></device>
        </fitbitClient>"#;
        let resp = parse_sync_response(xml).unwrap();
        assert!(resp.remote_ops.is_empty());
    }
}
