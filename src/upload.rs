use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::auth::AuthSession;
use crate::codec::decode::decode_changeset_id;
use crate::codec::encode::{encode_changeset, encode_osm_change};
use crate::codec::GENERATOR;
use crate::data::changeset::{ChangesetId, ChangesetMetadata, EditDiff};
use crate::data::osm::Entity;
use crate::errors::Result;
use crate::transport::Method;

/// Wait before closing a changeset, so replicas have caught up with the upload
/// before anything reads it back.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2500);

/// Source of the local edits to upload.
pub trait EditHistory {
    fn difference(&self) -> EditDiff;

    fn change_count(&self) -> usize {
        self.difference().len()
    }
}

/// Filter applied to the diff right before upload.
pub trait TagDiscardPolicy {
    fn apply(&self, diff: EditDiff) -> EditDiff;
}

/// Removes a fixed set of tag keys from created and modified entities.
#[derive(Debug, Clone, Default)]
pub struct DiscardTags {
    keys: HashSet<String>,
}

impl DiscardTags {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DiscardTags {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    fn strip(&self, mut entity: Entity) -> Entity {
        entity.tags_mut().retain(|key, _| !self.keys.contains(key));
        entity
    }
}

impl TagDiscardPolicy for DiscardTags {
    fn apply(&self, diff: EditDiff) -> EditDiff {
        EditDiff {
            created: diff.created.into_iter().map(|e| self.strip(e)).collect(),
            modified: diff.modified.into_iter().map(|e| self.strip(e)).collect(),
            deleted: diff.deleted,
        }
    }
}

/// Commits an edit diff as a changeset: create, upload, then a detached close.
pub struct ChangesetUploader {
    auth: Arc<AuthSession>,
    settle_delay: Duration,
}

impl ChangesetUploader {
    pub fn new(auth: Arc<AuthSession>, settle_delay: Duration) -> Self {
        ChangesetUploader { auth, settle_delay }
    }

    /// Opens a changeset, uploads `diff` into it and returns its id.
    ///
    /// A failure while opening or uploading aborts the commit; a changeset that
    /// was opened is then left open on the server. The result does not wait for
    /// the close request, which is sent after the settle delay and whose outcome
    /// is only logged.
    pub async fn put_changeset(&self, diff: &EditDiff, metadata: &ChangesetMetadata) -> Result<ChangesetId> {
        let create_body = encode_changeset(&metadata.tags(GENERATOR)).map_err(|err| err.into_fatal_upload("create"))?;
        let response = self
            .auth
            .signed_request(Method::Put, "/api/0.6/changeset/create", Some(create_body))
            .await
            .map_err(|err| err.into_fatal_upload("create"))?;
        let changeset_id = decode_changeset_id(&response).map_err(|err| err.into_fatal_upload("create"))?;
        info!(changeset_id = changeset_id; "Changeset opened");

        let upload_body = encode_osm_change(Some(changeset_id), diff).map_err(|err| err.into_fatal_upload("upload"))?;
        self.auth
            .signed_request(Method::Post, &format!("/api/0.6/changeset/{changeset_id}/upload"), Some(upload_body))
            .await
            .map_err(|err| err.into_fatal_upload("upload"))?;
        info!(changeset_id = changeset_id, changes = diff.len(); "Changeset uploaded");

        self.schedule_close(changeset_id);
        Ok(changeset_id)
    }

    fn schedule_close(&self, changeset_id: ChangesetId) -> JoinHandle<()> {
        let auth = Arc::clone(&self.auth);
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let path = format!("/api/0.6/changeset/{changeset_id}/close");
            match auth.signed_request(Method::Put, &path, None).await {
                Ok(_) => debug!(changeset_id = changeset_id; "Changeset closed"),
                Err(err) => warn!(changeset_id = changeset_id, err = err.message.as_str(); "Changeset close failed"),
            }
        })
    }
}
