pub fn http_to_ws_url(url: &str) -> String {
    if url.starts_with("https") {
        return url.replacen("https", "wss", 1);
    }
    url.replacen("http", "ws", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_from_http() {
        assert_eq!(
            http_to_ws_url("https://api.devnet.solana.com"),
            "wss://api.devnet.solana.com"
        );
        assert_eq!(http_to_ws_url("http://127.0.0.1:8899"), "ws://127.0.0.1:8899");
    }
}
