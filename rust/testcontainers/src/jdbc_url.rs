use std::collections::BTreeMap;

const SCHEME: &str = "jdbc:IRIS";

/// Builds `jdbc:IRIS://host:port/namespace[?k=v&...]`.
pub fn jdbc_url(host: &str, port: u16, namespace: &str, params: &BTreeMap<String, String>) -> String {
    format!(
        "{}://{}:{}/{}{}",
        SCHEME,
        host,
        port,
        namespace,
        url_parameters(params, "?", "&")
    )
}

/// Renders accumulated parameters, or an empty string when there are none.
pub fn url_parameters(params: &BTreeMap<String, String>, start: &str, delimiter: &str) -> String {
    if params.is_empty() {
        return String::new();
    }
    let joined = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(delimiter);
    format!("{}{}", start, joined)
}

/// Extracts the namespace path segment from a `jdbc:IRIS://` url.
pub fn namespace_of(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(SCHEME)?.strip_prefix("://")?;
    let (_, path) = rest.split_once('/')?;
    let namespace = path.split(['?', ';']).next()?;
    (!namespace.is_empty()).then_some(namespace)
}
