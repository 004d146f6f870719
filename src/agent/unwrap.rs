//! Unwrap search-engine image-result links to the underlying image URL.

use url::Url;

/// Proxy query parameters that carry the real image URL, per host family.
fn proxy_params(url: &Url) -> &'static [&'static str] {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let path = url.path();

    if host_has_label(&host, "google") {
        if path.starts_with("/imgres") {
            return &["imgurl"];
        }
        if path == "/url" || path.starts_with("/url/") {
            return &["url", "q"];
        }
        return &[];
    }
    if host == "bing.com" || host.ends_with(".bing.com") {
        return &["mediaurl"];
    }
    if (host == "duckduckgo.com" || host.ends_with(".duckduckgo.com")) && path.starts_with("/iu") {
        return &["u"];
    }
    if host_has_label(&host, "yandex") {
        return &["img_url"];
    }
    &[]
}

/// Whether `label` appears as a whole dot-separated label (`images.google.co.uk`).
fn host_has_label(host: &str, label: &str) -> bool {
    host.split('.').any(|part| part == label)
}

/// Whether `candidate` is an absolute `http(s)` URL.
pub fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

fn unwrap_once(input: &str) -> Option<String> {
    let url = Url::parse(input).ok()?;
    let params = proxy_params(&url);
    if params.is_empty() {
        return None;
    }
    // query_pairs percent-decodes values
    params.iter().find_map(|wanted| {
        url.query_pairs()
            .find(|(key, value)| key == *wanted && is_http_url(value))
            .map(|(_, value)| value.trim().to_string())
    })
}

/// Strip known image-proxy wrappers (Google, Bing, DuckDuckGo, Yandex).
///
/// Input that does not parse, or is not a known proxy, is returned unchanged.
/// Unwrapping repeats until nothing changes, so the result is a fixed point.
pub fn unwrap_image_url(input: &str) -> String {
    let mut current = input.to_string();
    while let Some(inner) = unwrap_once(&current) {
        // an embedded URL is always shorter than the wrapper holding it
        if inner.len() >= current.len() {
            break;
        }
        current = inner;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_imgres() {
        let wrapped = "https://www.google.com/imgres?imgurl=https%3A%2F%2Fcdn.example.com%2Fred%20shoe.jpg&imgrefurl=https%3A%2F%2Fshop.example.com";
        assert_eq!(
            unwrap_image_url(wrapped),
            "https://cdn.example.com/red shoe.jpg"
        );
    }

    #[test]
    fn test_google_url_redirect_uses_url_or_q() {
        assert_eq!(
            unwrap_image_url("https://www.google.co.uk/url?sa=i&url=https%3A%2F%2Fa.example%2Fx.png"),
            "https://a.example/x.png"
        );
        assert_eq!(
            unwrap_image_url("https://google.com/url?q=https%3A%2F%2Fb.example%2Fy.png"),
            "https://b.example/y.png"
        );
    }

    #[test]
    fn test_bing_duckduckgo_yandex() {
        assert_eq!(
            unwrap_image_url("https://www.bing.com/images/search?view=detailV2&mediaurl=https%3A%2F%2Fc.example%2Fz.jpg"),
            "https://c.example/z.jpg"
        );
        assert_eq!(
            unwrap_image_url("https://external-content.duckduckgo.com/iu/?u=https%3A%2F%2Fd.example%2Fw.jpg&f=1"),
            "https://d.example/w.jpg"
        );
        assert_eq!(
            unwrap_image_url("https://yandex.ru/images/search?img_url=https%3A%2F%2Fe.example%2Fv.jpg&pos=0"),
            "https://e.example/v.jpg"
        );
    }

    #[test]
    fn test_nested_wrappers_fully_unwrap() {
        let inner = "https://cdn.example.com/bag.jpg";
        let ddg = format!(
            "https://duckduckgo.com/iu/?u={}",
            urlencoding::encode(inner)
        );
        let google = format!(
            "https://www.google.com/imgres?imgurl={}",
            urlencoding::encode(&ddg)
        );
        assert_eq!(unwrap_image_url(&google), inner);
    }

    #[test]
    fn test_non_proxy_and_garbage_pass_through() {
        let plain = "https://cdn.example.com/cap.jpg";
        assert_eq!(unwrap_image_url(plain), plain);
        assert_eq!(unwrap_image_url("not a url"), "not a url");
        // proxy whose parameter is not an http(s) URL
        let odd = "https://www.google.com/imgres?imgurl=javascript%3Aalert(1)";
        assert_eq!(unwrap_image_url(odd), odd);
        // lookalike host
        let fake = "https://notgoogle.com/imgres?imgurl=https%3A%2F%2Fx.example%2Fa.jpg";
        assert_eq!(unwrap_image_url(fake), fake);
    }

    #[test]
    fn test_unwrap_is_idempotent() {
        let inputs = [
            "https://www.google.com/imgres?imgurl=https%3A%2F%2Fcdn.example.com%2Fa.jpg",
            "https://www.bing.com/images/search?mediaurl=https%3A%2F%2Fc.example%2Fz.jpg",
            "https://cdn.example.com/b.png",
            "%%%",
            "",
        ];
        for input in inputs {
            let once = unwrap_image_url(input);
            assert_eq!(unwrap_image_url(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://a.example/x.jpg"));
        assert!(is_http_url(" http://a.example "));
        assert!(!is_http_url("ftp://a.example/x.jpg"));
        assert!(!is_http_url("a.example/x.jpg"));
    }
}
