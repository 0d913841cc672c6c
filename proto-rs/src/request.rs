use serde::{Deserialize, Serialize};
use std::fmt;

/// Request method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other(String),
}

impl Method {
    /// Parse a method name (case-insensitive)
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the fetched resource is used for (mirrors `Sec-Fetch-Dest`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Full page navigation
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// fetch()/XHR style requests with no specific destination
    Empty,
    Other(String),
}

impl Destination {
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "manifest" => Destination::Manifest,
            "" | "empty" => Destination::Empty,
            other => Destination::Other(other.to_string()),
        }
    }

    /// Guess a destination from a resource path, used for precache requests
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if path.ends_with('/') || path.ends_with(".html") || path.ends_with(".htm") {
            return Destination::Document;
        }
        match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "js" || ext == "mjs" => Destination::Script,
            Some(ext) if ext == "css" => Destination::Style,
            Some(ext)
                if matches!(
                    ext.as_str(),
                    "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp" | "avif"
                ) =>
            {
                Destination::Image
            }
            Some(ext) if matches!(ext.as_str(), "woff" | "woff2" | "ttf" | "otf") => {
                Destination::Font
            }
            Some(ext) if ext == "webmanifest" => Destination::Manifest,
            _ => Destination::Empty,
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, Destination::Document)
    }
}

/// Identity of a request in a cache generation: method + URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An outgoing resource request from the application shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    /// Root-relative path with query, or an absolute URL
    pub url: String,
    pub destination: Destination,
    pub headers: Vec<(String, String)>, // (name, value) pairs
    pub body: Vec<u8>,
}

impl Request {
    /// Build a GET request with no headers
    pub fn get(url: impl Into<String>, destination: Destination) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            destination,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
