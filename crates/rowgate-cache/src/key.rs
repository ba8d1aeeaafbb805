use rowgate_chain::Request;
use urlencoding::encode;

/// Canonical cache key of a request.
///
/// `{host}[:{port}]{path}` followed by the parameters sorted by name, so
/// the order the caller wrote them in never matters. Names and values are
/// percent-encoded again, so a decoded `&` or `=` cannot merge or split
/// parameters. Callers strip the bypass parameter before computing the key.
pub fn cache_key(req: &Request) -> String {
    let mut params: Vec<(&str, &str)> = req
        .params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    params.sort();

    let mut key = format!("{}{}", req.host(), req.path());
    for (i, (name, value)) in params.iter().enumerate() {
        key.push(if i == 0 { '?' } else { '&' });
        key.push_str(&encode(name));
        if !value.is_empty() {
            key.push('=');
            key.push_str(&encode(value));
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    fn request(url: &str, params: &[(&str, &str)]) -> Request {
        Request {
            method: Method::GET,
            url: Url::parse(url).unwrap(),
            collection: "orders".to_string(),
            entity_key: None,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
        }
    }

    #[test]
    fn test_parameters_are_sorted() {
        let a = request(
            "http://api.local:8080/northwind/orders",
            &[("shipcity", "Reims"), ("eq(freight,10)", ""), ("page", "2")],
        );
        let b = request(
            "http://api.local:8080/northwind/orders",
            &[("page", "2"), ("shipcity", "Reims"), ("eq(freight,10)", "")],
        );

        assert_eq!(cache_key(&a), cache_key(&b));
        assert_eq!(
            cache_key(&a),
            "api.local:8080/northwind/orders?eq%28freight%2C10%29&page=2&shipcity=Reims"
        );
    }

    #[test]
    fn test_encoded_separators_stay_distinct() {
        let url = "http://h/nw/orders";
        let one = request(url, &[("city", "x&shipname=y")]);
        let two = request(url, &[("city", "x"), ("shipname", "y")]);

        assert_ne!(cache_key(&one), cache_key(&two));
        assert_eq!(cache_key(&one), "h/nw/orders?city=x%26shipname%3Dy");
        assert_eq!(cache_key(&two), "h/nw/orders?city=x&shipname=y");

        let spaced = request(url, &[("shipname", "Blauer See")]);
        assert_eq!(cache_key(&spaced), "h/nw/orders?shipname=Blauer%20See");
    }

    #[test]
    fn test_no_parameters() {
        let req = request("https://api.local/northwind/orders/10248", &[]);
        assert_eq!(cache_key(&req), "api.local/northwind/orders/10248");
    }
}
