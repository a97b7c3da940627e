//! HTTP route table.
//!
//! Routes are kept in registration order and the table grows as needed;
//! the only rejected registration is a duplicate `(uri, method)` pair.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// What a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Root,
    ConfigForm,
    ConfigSubmit,
    FileList,
    FileDownload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub uri: &'static str,
    pub method: Method,
    pub page: Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    Duplicate { uri: &'static str, method: Method },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { uri, method } => {
                write!(f, "route {:?} {} already registered", method, uri)
            }
        }
    }
}

impl std::error::Error for RouteError {}

#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The firmware's route set.
    pub fn standard() -> Self {
        let route = |uri, method, page| Route { uri, method, page };
        Self {
            routes: vec![
                route("/", Method::Get, Page::Root),
                route("/config", Method::Get, Page::ConfigForm),
                route("/config", Method::Post, Page::ConfigSubmit),
                route("/files", Method::Get, Page::FileList),
                route("/files/download", Method::Get, Page::FileDownload),
            ],
        }
    }

    pub fn add(&mut self, uri: &'static str, method: Method, page: Page) -> Result<(), RouteError> {
        if self.routes.iter().any(|r| r.uri == uri && r.method == method) {
            return Err(RouteError::Duplicate { uri, method });
        }
        self.routes.push(Route { uri, method, page });
        Ok(())
    }

    /// Match a request path (query string ignored).
    pub fn lookup(&self, path: &str, method: Method) -> Option<Page> {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        self.routes
            .iter()
            .find(|r| r.uri == path && r.method == method)
            .map(|r| r.page)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
