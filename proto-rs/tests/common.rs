use shellcache_proto::*;

// Entries shared by the codec tests
pub fn sample_entries() -> Vec<CachedEntry> {
    vec![
        CachedEntry {
            key: RequestKey::get("/"),
            response: Response::basic(200, "<!doctype html><html></html>")
                .with_header("content-type", "text/html; charset=utf-8"),
            stored_at: 1722550000000, // Fixed timestamp so the header bytes are predictable
        },
        CachedEntry {
            key: RequestKey::get("/data?x=1"),
            response: Response::basic(200, r#"{"x":1}"#)
                .with_header("content-type", "application/json"),
            stored_at: 1722550000500,
        },
        CachedEntry {
            key: RequestKey {
                method: Method::Other("PURGE".to_string()),
                url: "https://cdn.example.com/lib.js".to_string(),
            },
            response: Response::opaque(),
            stored_at: 0,
        },
    ]
}
