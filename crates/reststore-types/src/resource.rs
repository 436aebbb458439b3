use std::cmp::Ordering;

use crate::document::DocumentResource;
use crate::fault::ErrorChannel;

/// Synthetic name of the storage root in listings.
pub const ROOT_COLLECTION_NAME: &str = "root";

/// What a [`Resource`] turned out to be.
#[derive(Debug, Default)]
pub enum ResourceKind {
    /// Nothing is stored at the path.
    #[default]
    Missing,
    /// A leaf resource with content.
    Document(DocumentResource),
    /// A directory-like resource with children.
    Collection(CollectionResource),
}

/// Ordered children of a collection.
#[derive(Debug, Default)]
pub struct CollectionResource {
    /// Children, collections first, then documents, each group by name.
    pub items: Vec<Resource>,
}

impl CollectionResource {
    pub fn new(items: Vec<Resource>) -> Self {
        Self { items }
    }

    /// Sort children into listing order.
    pub fn sort(&mut self) {
        self.items.sort_by(listing_order);
    }

    /// Child names in listing order, collections suffixed with `/`.
    pub fn listing_names(&self) -> Vec<String> {
        let mut refs: Vec<&Resource> = self.items.iter().collect();
        refs.sort_by(|a, b| listing_order(a, b));
        refs.into_iter().map(Resource::listing_name).collect()
    }
}

fn listing_order(a: &Resource, b: &Resource) -> Ordering {
    b.is_collection()
        .cmp(&a.is_collection())
        .then_with(|| a.name.cmp(&b.name))
}

/// Outcome of a storage operation.
///
/// Fault flags are independent of each other. Not-found is expressed through
/// `exists = false` and never sets `error`.
#[derive(Default)]
pub struct Resource {
    /// Leaf name, assigned by the container that discovered the resource.
    pub name: String,
    pub exists: bool,
    /// `false` when a conditional request matched the stored entity tag.
    pub modified: bool,
    pub invalid: bool,
    pub rejected: bool,
    pub error: bool,
    pub invalid_message: Option<String>,
    pub error_message: Option<String>,
    /// Late failures of an in-flight resource.
    pub errors: ErrorChannel,
    pub kind: ResourceKind,
}

impl Resource {
    fn with_kind(kind: ResourceKind) -> Self {
        Self {
            exists: true,
            modified: true,
            kind,
            ..Default::default()
        }
    }

    /// A path with nothing stored at it.
    pub fn missing() -> Self {
        Self {
            exists: false,
            ..Self::with_kind(ResourceKind::Missing)
        }
    }

    pub fn document(document: DocumentResource) -> Self {
        Self::with_kind(ResourceKind::Document(document))
    }

    pub fn collection(collection: CollectionResource) -> Self {
        Self::with_kind(ResourceKind::Collection(collection))
    }

    /// Conditional request matched; nothing to transfer.
    pub fn not_modified() -> Self {
        Self {
            modified: false,
            ..Self::with_kind(ResourceKind::Missing)
        }
    }

    /// Engine fault carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: true,
            error_message: Some(message.into()),
            ..Self::with_kind(ResourceKind::Missing)
        }
    }

    /// Operation refused, e.g. because of a conflicting lock.
    pub fn rejected(message: Option<String>) -> Self {
        Self {
            rejected: true,
            error_message: message,
            ..Self::with_kind(ResourceKind::Missing)
        }
    }

    /// Set the leaf name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, ResourceKind::Collection(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self.kind, ResourceKind::Document(_))
    }

    pub fn as_document_mut(&mut self) -> Option<&mut DocumentResource> {
        match &mut self.kind {
            ResourceKind::Document(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionResource> {
        match &self.kind {
            ResourceKind::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Name as rendered in a listing: collections carry a trailing `/`.
    pub fn listing_name(&self) -> String {
        if self.is_collection() {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Resource {}

impl PartialOrd for Resource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Resource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("exists", &self.exists)
            .field("modified", &self.modified)
            .field("invalid", &self.invalid)
            .field("rejected", &self.rejected)
            .field("error", &self.error)
            .field("error_message", &self.error_message)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Name of the collection at `path` as used for listing keys.
///
/// The root has no last segment and is named [`ROOT_COLLECTION_NAME`].
pub fn collection_name(path: &str) -> String {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => ROOT_COLLECTION_NAME.to_string(),
    }
}
