//! Durable listing catalog backed by a single JSON file.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{AccountId, ListingId},
    errors::Error,
    policy::AuthorizationPolicy,
    Result,
};

/// A marketplace item. Never updated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image_url: String,
    pub seller: AccountId,
    #[serde(default)]
    pub image_path: String,
}

/// Image supplied with an add-item command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageAttachment {
    /// Adapter-owned handle (Telegram file id, CDN url, ...).
    pub reference: String,
    pub content_type: Option<String>,
    /// Local copy, if the adapter downloaded one.
    pub local_path: Option<PathBuf>,
}

impl ImageAttachment {
    pub fn is_image(&self) -> bool {
        !self.reference.trim().is_empty()
            && self
                .content_type
                .as_deref()
                .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
                .unwrap_or(false)
    }
}

/// Reject a missing attachment or one that is not an image.
pub fn validate_image(image: Option<&ImageAttachment>) -> Result<&ImageAttachment> {
    let Some(image) = image else {
        return Err(Error::Validation(
            "Please attach an image with your item.".to_string(),
        ));
    };
    if !image.is_image() {
        return Err(Error::Validation(
            "The attachment must be an image.".to_string(),
        ));
    }
    Ok(image)
}

#[derive(Clone, Debug)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image: Option<ImageAttachment>,
    pub seller: AccountId,
}

impl NewListing {
    fn validate(&self) -> Result<&ImageAttachment> {
        let image = validate_image(self.image.as_ref())?;
        if self.title.trim().is_empty() {
            return Err(Error::Validation("Title must not be empty.".to_string()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::Validation(
                "Price must be a non-negative number.".to_string(),
            ));
        }
        Ok(image)
    }
}

/// On-disk shape: `{ "items": [...], "last_id": n }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct CatalogFile {
    items: Vec<Listing>,
    /// Highest id ever handed out, so ids stay increasing after removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_id: Option<u64>,
}

impl CatalogFile {
    fn next_id(&self) -> ListingId {
        let max_present = self.items.iter().map(|l| l.id.0).max().unwrap_or(0);
        ListingId(max_present.max(self.last_id.unwrap_or(0)) + 1)
    }
}

/// Listing catalog.
///
/// Every call loads the file; mutations are load-modify-save cycles serialized
/// behind one mutex, and saves go through a temp file + rename.
pub struct ListingStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ListingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn add(&self, new: NewListing) -> Result<Listing> {
        let image = new.validate()?.clone();

        let _guard = self.lock.lock().await;
        let mut catalog = load_catalog(&self.path)?;

        let id = catalog.next_id();
        let listing = Listing {
            id,
            title: new.title.trim().to_string(),
            description: new.description.trim().to_string(),
            price: new.price,
            image_url: image.reference,
            seller: new.seller,
            image_path: image
                .local_path
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        };

        catalog.items.push(listing.clone());
        catalog.last_id = Some(id.0);
        save_catalog(&self.path, &catalog)?;

        tracing::info!(listing_id = id.0, seller = %listing.seller, "listing added");
        Ok(listing)
    }

    pub async fn remove(
        &self,
        id: ListingId,
        requester: &AccountId,
        policy: &dyn AuthorizationPolicy,
    ) -> Result<Listing> {
        let _guard = self.lock.lock().await;
        let mut catalog = load_catalog(&self.path)?;

        let Some(idx) = catalog.items.iter().position(|l| l.id == id) else {
            return Err(Error::NotFound(format!("listing {id}")));
        };
        if !policy.can_remove(&catalog.items[idx], requester) {
            return Err(Error::PermissionDenied(
                "You don't have permission to remove this item.".to_string(),
            ));
        }

        catalog.last_id = Some(catalog.next_id().0 - 1);
        let removed = catalog.items.remove(idx);
        save_catalog(&self.path, &catalog)?;

        tracing::info!(listing_id = id.0, requester = %requester, "listing removed");
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<Listing>> {
        let _guard = self.lock.lock().await;
        Ok(load_catalog(&self.path)?.items)
    }

    /// Case-insensitive substring match on title or description.
    pub async fn search(&self, keyword: &str) -> Result<Vec<Listing>> {
        let needle = keyword.to_lowercase();
        let items = self.list().await?;
        Ok(items
            .into_iter()
            .filter(|l| {
                l.title.to_lowercase().contains(&needle)
                    || l.description.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn get(&self, id: ListingId) -> Result<Option<Listing>> {
        let items = self.list().await?;
        Ok(items.into_iter().find(|l| l.id == id))
    }
}

fn load_catalog(path: &Path) -> Result<CatalogFile> {
    if !path.exists() {
        return Ok(CatalogFile::default());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(CatalogFile::default());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn save_catalog(path: &Path, catalog: &CatalogFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let bytes = serde_json::to_vec_pretty(catalog)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{policy::MarketPolicy, testing::FakeChannels};

    fn image() -> Option<ImageAttachment> {
        Some(ImageAttachment {
            reference: "file-abc".to_string(),
            content_type: Some("image/jpeg".to_string()),
            local_path: Some(PathBuf::from("item_images/chair.jpg")),
        })
    }

    fn new_listing(title: &str, description: &str, price: f64, seller: &str) -> NewListing {
        NewListing {
            title: title.to_string(),
            description: description.to_string(),
            price,
            image: image(),
            seller: AccountId::from(seller),
        }
    }

    fn policy() -> MarketPolicy {
        MarketPolicy::new(Arc::new(FakeChannels::default()))
    }

    fn store(dir: &tempfile::TempDir) -> ListingStore {
        ListingStore::new(dir.path().join("items.json"))
    }

    #[tokio::test]
    async fn chair_and_table_example() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let policy = policy();

        let chair = store
            .add(new_listing("Chair", "Wooden chair", 25.0, "alice"))
            .await
            .unwrap();
        let table = store
            .add(new_listing("Table", "Oak table", 80.0, "bob"))
            .await
            .unwrap();
        assert_eq!(chair.id, ListingId(1));
        assert_eq!(table.id, ListingId(2));

        let err = store
            .remove(ListingId(1), &AccountId::from("bob"), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(store.list().await.unwrap().len(), 2);

        store
            .remove(ListingId(1), &AccountId::from("alice"), &policy)
            .await
            .unwrap();
        let ids: Vec<_> = store.list().await.unwrap().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![ListingId(2)]);
    }

    #[tokio::test]
    async fn remove_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let err = store
            .remove(ListingId(9), &AccountId::from("alice"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn ids_never_reused_after_removing_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let policy = policy();

        let mut seen = Vec::new();
        for i in 0..3 {
            let l = store
                .add(new_listing(&format!("item {i}"), "", 1.0, "alice"))
                .await
                .unwrap();
            seen.push(l.id);
        }
        store
            .remove(ListingId(3), &AccountId::from("alice"), &policy)
            .await
            .unwrap();
        store
            .remove(ListingId(2), &AccountId::from("alice"), &policy)
            .await
            .unwrap();
        seen.push(store.add(new_listing("again", "", 1.0, "alice")).await.unwrap().id);

        assert_eq!(
            seen,
            vec![ListingId(1), ListingId(2), ListingId(3), ListingId(4)]
        );
    }

    #[tokio::test]
    async fn add_rejects_missing_or_non_image_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut no_image = new_listing("Chair", "Wooden chair", 25.0, "alice");
        no_image.image = None;
        assert!(matches!(
            store.add(no_image).await.unwrap_err(),
            Error::Validation(_)
        ));

        let mut pdf = new_listing("Chair", "Wooden chair", 25.0, "alice");
        pdf.image = Some(ImageAttachment {
            reference: "file-pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            local_path: None,
        });
        assert!(matches!(store.add(pdf).await.unwrap_err(), Error::Validation(_)));

        let bad_price = new_listing("Chair", "Wooden chair", f64::NAN, "alice");
        assert!(matches!(
            store.add(bad_price).await.unwrap_err(),
            Error::Validation(_)
        ));

        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_on_title_and_description() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .add(new_listing("Chair", "Wooden chair", 25.0, "alice"))
            .await
            .unwrap();
        store
            .add(new_listing("Table", "Oak TABLE", 80.0, "bob"))
            .await
            .unwrap();
        store
            .add(new_listing("Lamp", "brass, wooden base", 15.0, "carol"))
            .await
            .unwrap();

        let titles = |ls: Vec<Listing>| ls.into_iter().map(|l| l.title).collect::<Vec<_>>();
        assert_eq!(titles(store.search("WOOD").await.unwrap()), vec!["Chair", "Lamp"]);
        assert_eq!(titles(store.search("oak").await.unwrap()), vec!["Table"]);
        assert!(store.search("sofa").await.unwrap().is_empty());
        assert_eq!(store.search("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reload_reproduces_identical_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let first = store(&dir);
        first
            .add(new_listing("Chair", "Wooden chair", 25.0, "alice"))
            .await
            .unwrap();
        first
            .add(new_listing("Table", "Oak table", 80.5, "bob"))
            .await
            .unwrap();
        let before = first.list().await.unwrap();

        let second = store(&dir);
        assert_eq!(second.list().await.unwrap(), before);
        assert_eq!(before[0].image_path, "item_images/chair.jpg");
    }

    #[tokio::test]
    async fn reads_files_without_last_id_or_image_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(
            &path,
            r#"{"items":[{"id":4,"title":"Bike","description":"Red","price":120,"image_url":"u","seller":"dan"}]}"#,
        )
        .unwrap();

        let store = ListingStore::new(&path);
        assert_eq!(store.get(ListingId(4)).await.unwrap().unwrap().price, 120.0);
        let next = store
            .add(new_listing("Helmet", "", 10.0, "dan"))
            .await
            .unwrap();
        assert_eq!(next.id, ListingId(5));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["items"].as_array().unwrap().len(), 2);
        assert_eq!(raw["items"][1]["image_path"], "item_images/chair.jpg");
        assert_eq!(raw["last_id"], 5);
    }

    #[tokio::test]
    async fn concurrent_adds_get_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(&dir));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add(new_listing(&format!("item {i}"), "", 1.0, "alice"))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(store.list().await.unwrap().len(), 16);
    }
}
