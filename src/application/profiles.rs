//! Profile pages: a request-cached view built around a fragment-cached card.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cache::{
    CacheView, FragmentCache, FragmentOptions, RequestCache, RequestInfo, VersionedKeyStore,
    ViewOptions,
};
use crate::domain::{Model, ObjectStore, Profile};
use crate::infra::objects::MemoryObjectStore;

use super::error::AppError;

/// Partial update accepted by [`ProfileService::update`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
}

impl ProfileUpdate {
    fn changes(self) -> impl Iterator<Item = (&'static str, String)> {
        [("name", self.name), ("email", self.email), ("bio", self.bio)]
            .into_iter()
            .filter_map(|(field, value)| value.map(|value| (field, value)))
    }
}

/// A single field read through a partial proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRead {
    pub id: u64,
    pub field: &'static str,
    pub value: Value,
    /// Whether answering required loading the full object.
    pub loaded: bool,
}

pub struct ProfileService {
    objects: Arc<MemoryObjectStore<Profile>>,
    versions: Arc<VersionedKeyStore>,
    requests: Arc<RequestCache>,
    fragments: FragmentCache,
}

impl ProfileService {
    pub fn new(
        objects: Arc<MemoryObjectStore<Profile>>,
        versions: Arc<VersionedKeyStore>,
        requests: Arc<RequestCache>,
        fragments: FragmentCache,
    ) -> Self {
        Self {
            objects,
            versions,
            requests,
            fragments,
        }
    }

    pub async fn create(&self, profile: Profile) -> Result<Profile, AppError> {
        let profile = self.objects.insert(profile).await?;
        info!(pk = profile.id, "profile created");
        Ok(profile)
    }

    /// Full profile page. Served whole from the request cache when warm.
    #[instrument(skip(self, request))]
    pub async fn page(&self, request: &RequestInfo, id: u64) -> Result<Bytes, AppError> {
        if let CacheView::Hit(body) = self.requests.cache_view(request, view_options(id)).await? {
            return Ok(body);
        }

        let mut profile = self.objects.get(&id).await?.ok_or(AppError::NotFound)?;
        let card_source = profile.clone();
        let card = self
            .fragments
            .render_cached_for(
                request,
                &mut profile,
                self.objects.as_ref(),
                FragmentOptions::named("card"),
                move || async move { Ok::<_, AppError>(render_card(&card_source)) },
            )
            .await?;

        Ok(render_page(&profile, &card))
    }

    /// Read one field, preferring the attribute snapshot over a full load.
    pub async fn field(&self, id: u64, field: &'static str) -> Result<FieldRead, AppError> {
        let mut proxy = self
            .versions
            .get_partial_proxy::<Profile>(id, self.objects.clone())
            .await?;
        let value = proxy.get(field).await?;
        debug!(pk = id, field, loaded = proxy.is_loaded(), "field read via proxy");
        Ok(FieldRead {
            id,
            field,
            value,
            loaded: proxy.is_loaded(),
        })
    }

    /// Apply `changes`, rotating the version tag, and drop the cached page.
    #[instrument(skip(self, request, changes))]
    pub async fn update(
        &self,
        request: &RequestInfo,
        id: u64,
        changes: ProfileUpdate,
    ) -> Result<Profile, AppError> {
        let mut profile = self.objects.get(&id).await?.ok_or(AppError::NotFound)?;
        for (field, value) in changes.changes() {
            profile.set_field(field, Value::String(value))?;
        }

        let profile = self.objects.update(profile).await?;

        let page = RequestInfo::new(request.endpoint.clone(), request.path.clone(), "GET");
        let cleared = self
            .requests
            .clear_request_cache(&page, view_options(id))
            .await?;
        info!(pk = id, cleared = %cleared, "profile updated");
        Ok(profile)
    }
}

fn view_options(id: u64) -> ViewOptions {
    ViewOptions::default().facets([id])
}

fn render_card(profile: &Profile) -> Bytes {
    Bytes::from(format!(
        "<section class=\"card\"><h2>{}</h2><p>{}</p></section>",
        escape_html(&profile.name),
        escape_html(&profile.bio),
    ))
}

fn render_page(profile: &Profile, card: &[u8]) -> Bytes {
    let mut page = format!(
        "<!doctype html><html><head><title>{}</title></head><body>",
        escape_html(&profile.name)
    )
    .into_bytes();
    page.extend_from_slice(card);
    page.extend_from_slice(
        format!(
            "<footer><a href=\"mailto:{0}\">{0}</a></footer></body></html>",
            escape_html(&profile.email)
        )
        .as_bytes(),
    );
    Bytes::from(page)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
