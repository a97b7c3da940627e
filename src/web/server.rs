//! Binds the route table to the ESP-IDF HTTP server.

use std::fs::File;
use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method as HttpMethod;
use esp_idf_svc::io::{Read, Write};
use log::{info, warn};

use crate::adapters::nvs::{EspNvsBackend, Kvs};
use crate::web::files::{self, DOWNLOAD_CHUNK};
use crate::web::form;
use crate::web::pages;
use crate::web::routes::{Method, Page, RouteTable};

/// Largest configuration form body accepted.
const MAX_FORM_BODY: usize = 1024;

type Req<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;

/// State shared by every handler.
#[derive(Clone)]
struct WebContext {
    kvs: Arc<Kvs<EspNvsBackend>>,
    files_dir: PathBuf,
}

/// Start the HTTP server with the standard routes.
///
/// The server stops when the returned handle is dropped.
pub fn start(
    kvs: Arc<Kvs<EspNvsBackend>>,
    files_dir: impl Into<PathBuf>,
) -> Result<EspHttpServer<'static>> {
    let table = RouteTable::standard();
    let config = Configuration {
        max_uri_handlers: table.len(),
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&config)?;
    let ctx = WebContext {
        kvs,
        files_dir: files_dir.into(),
    };

    for route in table.iter() {
        let method = match route.method {
            Method::Get => HttpMethod::Get,
            Method::Post => HttpMethod::Post,
        };
        let page = route.page;
        let ctx = ctx.clone();
        server.fn_handler::<anyhow::Error, _>(route.uri, method, move |req| {
            handle(&ctx, page, req)
        })?;
    }
    info!("Web: server started with {} routes", table.len());
    Ok(server)
}

fn handle(ctx: &WebContext, page: Page, req: Req<'_, '_>) -> Result<()> {
    match page {
        Page::Root => send_html(req, pages::ROOT_PAGE),
        Page::ConfigForm => {
            let (settings, credentials) = pages::current_config(&ctx.kvs);
            send_html(req, &pages::config_page(&settings, &credentials))
        }
        Page::ConfigSubmit => config_submit(ctx, req),
        Page::FileList => {
            let names = files::list_images(&ctx.files_dir)?;
            send_html(req, &files::render_listing(&names))
        }
        Page::FileDownload => download(ctx, req),
    }
}

fn send_html(req: Req<'_, '_>, body: &str) -> Result<()> {
    let mut resp = req.into_response(200, None, &[("Content-Type", "text/html")])?;
    resp.write_all(body.as_bytes())?;
    Ok(())
}

fn config_submit(ctx: &WebContext, mut req: Req<'_, '_>) -> Result<()> {
    let mut body = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = req.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if body.len() + n > MAX_FORM_BODY {
            warn!("Web: config body over {} bytes rejected", MAX_FORM_BODY);
            req.into_status_response(413)?;
            return Ok(());
        }
        body.extend_from_slice(&buf[..n]);
    }
    let body = core::str::from_utf8(&body).map_err(|_| anyhow!("form body is not UTF-8"))?;
    pages::apply_config_form(&ctx.kvs, body);
    req.into_response(303, None, &[("Location", "/config")])?;
    Ok(())
}

fn download(ctx: &WebContext, req: Req<'_, '_>) -> Result<()> {
    let query = req.uri().split_once('?').map(|(_, q)| q).unwrap_or("");
    let name = form::field(query, "file").unwrap_or_default();
    let Some(path) = files::resolve_download(&ctx.files_dir, &name) else {
        req.into_status_response(404)?;
        return Ok(());
    };
    let mut file = File::open(&path)?;
    let disposition = files::content_disposition(&name);
    let mut resp = req.into_response(
        200,
        None,
        &[
            ("Content-Type", "application/octet-stream"),
            ("Content-Disposition", disposition.as_str()),
        ],
    )?;
    let mut chunk = [0u8; DOWNLOAD_CHUNK];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        resp.write_all(&chunk[..n])?;
    }
    info!("Web: sent {}", name);
    Ok(())
}
