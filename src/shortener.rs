use std::{io, sync::Arc};

use async_trait::async_trait;
use url::{Host, Url};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::ShortUrl,
    repository::{StoreError, UrlRepository},
};

const MINT_ATTEMPTS: usize = 5;

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<()>;
}

/// Resolves through the system resolver.
pub struct DnsResolver;

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> io::Result<()> {
        let mut addrs = tokio::net::lookup_host((host, 0)).await?;
        match addrs.next() {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host} has no addresses"),
            )),
        }
    }
}

#[derive(Clone)]
pub struct UrlShortener {
    urls: Arc<dyn UrlRepository>,
    resolver: Arc<dyn HostResolver>,
}

impl UrlShortener {
    #[must_use]
    pub fn new(urls: Arc<dyn UrlRepository>, resolver: Arc<dyn HostResolver>) -> Self {
        Self { urls, resolver }
    }

    /// Returns the mapping for `original_url`, creating it on first use.
    /// The URL is stored in its serialized form, which is always a valid
    /// `Location` header value.
    pub async fn shorten(&self, original_url: &str) -> Result<ShortUrl, AppError> {
        let url = parse_web_url(original_url.trim())?;
        let original_url = url.as_str();
        if let Some(Host::Domain(domain)) = url.host() {
            if let Err(err) = self.resolver.resolve(domain).await {
                tracing::debug!(err = ?err, domain);
                return Err(AppError::DnsLookup {
                    host: domain.to_owned(),
                });
            }
        }

        if let Some(existing) = self.urls.find_by_original(original_url).await? {
            return Ok(existing);
        }

        for _ in 0..MINT_ATTEMPTS {
            let candidate = ShortUrl {
                original_url: original_url.to_owned(),
                short_url: mint_short_url(),
            };
            match self.urls.insert_url(&candidate).await {
                Ok(()) => {
                    tracing::info!(short_url = %candidate.short_url, "created short url");
                    return Ok(candidate);
                }
                // Either a concurrent request stored this URL first, or the
                // freshly minted identifier is taken.
                Err(StoreError::Duplicate) => {
                    if let Some(existing) = self.urls.find_by_original(original_url).await? {
                        return Ok(existing);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AppError::CollidedURL)
    }

    pub async fn resolve(&self, short_url: &str) -> Result<ShortUrl, AppError> {
        self.urls
            .find_by_short(short_url)
            .await?
            .ok_or_else(|| AppError::UnknownShortURL(short_url.to_owned()))
    }
}

/// Accepts absolute `http`/`https` URLs with a non-empty host.
pub fn parse_web_url(raw: &str) -> Result<Url, AppError> {
    let Ok(url) = raw.parse::<Url>() else {
        return Err(AppError::MalformedURL);
    };
    if !matches!(url.scheme(), "https" | "http") {
        return Err(AppError::MalformedURL);
    }
    match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => Ok(url),
        Some(Host::Ipv4(_) | Host::Ipv6(_)) => Ok(url),
        _ => Err(AppError::MalformedURL),
    }
}

/// 48 random bits, base62 encoded (at most 9 characters).
#[must_use]
pub fn mint_short_url() -> String {
    base62::encode(Uuid::new_v4().as_u128() >> 80)
}
