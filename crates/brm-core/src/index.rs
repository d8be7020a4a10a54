//! # Index Translation
//!
//! Maps list positions between the local model and the mediator's document by
//! matching ids.
//!
//! ## Example
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   local model            remote document                                │
//! │   0: Z  ───────────┐     0: X                                           │
//! │   1: X  ─────────┐ │     1: Y                                           │
//! │   2: Y  ───────┐ │ └──►  2: Z                                           │
//! │                │ └────►  0                                              │
//! │                └──────►  1                                              │
//! │                                                                         │
//! │   /S:brm/backup-manager/0/backup/3  ──►  /S:brm/backup-manager/2/...    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fallbacks
//! - No document: every translation returns its input.
//! - Local position unknown to the model: the input is returned.
//! - Entity absent from the document: `None` (the caller decides whether
//!   that is an ADD or a conflict).

use crate::document::ConfigurationDocument;
use crate::model::ModelView;
use crate::path::{backup_position, manager_position, rewrite_positions};

/// Translator over one model view and one document snapshot.
pub struct IndexTranslator<'a> {
    model: &'a dyn ModelView,
    document: Option<&'a ConfigurationDocument>,
}

impl<'a> IndexTranslator<'a> {
    pub fn new(model: &'a dyn ModelView, document: Option<&'a ConfigurationDocument>) -> Self {
        IndexTranslator { model, document }
    }

    /// Remote position of the manager at local position `local`.
    pub fn local_to_remote_manager(&self, local: usize) -> Option<usize> {
        let Some(document) = self.document else {
            return Some(local);
        };
        match self.model.managers().get(local) {
            Some(manager) => document.manager_position(&manager.id),
            None => Some(local),
        }
    }

    /// Remote position of backup `local_backup` of the manager at local
    /// position `local_manager`.
    pub fn local_to_remote_backup(&self, local_manager: usize, local_backup: usize) -> Option<usize> {
        let Some(document) = self.document else {
            return Some(local_backup);
        };
        let managers = self.model.managers();
        let Some(manager) = managers.get(local_manager) else {
            return Some(local_backup);
        };
        let Some(backup) = manager.backups.get(local_backup) else {
            return Some(local_backup);
        };
        let remote_manager = document.manager_position(&manager.id)?;
        document.backup_position(remote_manager, &backup.id)
    }

    /// Local position of the manager at remote position `remote`.
    pub fn remote_to_local_manager(&self, remote: usize) -> Option<usize> {
        let Some(document) = self.document else {
            return Some(remote);
        };
        let id = &document.managers().get(remote)?.id;
        self.model.manager_index(id)
    }

    /// Local position of backup `remote_backup` of the manager at remote
    /// position `remote_manager`.
    pub fn remote_to_local_backup(&self, remote_manager: usize, remote_backup: usize) -> Option<usize> {
        let Some(document) = self.document else {
            return Some(remote_backup);
        };
        let manager = document.managers().get(remote_manager)?;
        let backup_id = manager.backup_ids.get(remote_backup)?;
        self.model.manager(&manager.id)?.backup_index(backup_id)
    }

    /// Rewrites a local path into remote positions.
    ///
    /// Returns `None` when the path's manager is absent from the document.
    /// A backup absent from the document keeps its local position.
    pub fn to_remote_path(&self, path: &str) -> Option<String> {
        let Some(local_manager) = manager_position(path) else {
            return Some(path.to_string());
        };
        let remote_manager = self.local_to_remote_manager(local_manager)?;
        let remote_backup =
            backup_position(path).and_then(|b| self.local_to_remote_backup(local_manager, b));
        Some(rewrite_positions(path, Some(remote_manager), remote_backup))
    }

    /// Rewrites a remote path into local positions.
    ///
    /// Returns `None` when the path names an entity the local model lacks.
    pub fn to_local_path(&self, path: &str) -> Option<String> {
        let Some(remote_manager) = manager_position(path) else {
            return Some(path.to_string());
        };
        let local_manager = self.remote_to_local_manager(remote_manager)?;
        let local_backup = match backup_position(path) {
            Some(b) => Some(self.remote_to_local_backup(remote_manager, b)?),
            None => None,
        };
        Some(rewrite_positions(path, Some(local_manager), local_backup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::manager;
    use crate::model::StaticModel;
    use serde_json::json;

    fn remote_xyz() -> ConfigurationDocument {
        ConfigurationDocument::from_value(json!({
            "data": { "s:brm": { "backup-manager": [
                { "id": "X", "backup": [ { "id": "x1" }, { "id": "x2" } ] },
                { "id": "Y" },
                { "id": "Z", "backup": [ { "id": "z2" }, { "id": "z1" } ] }
            ] } }
        }))
        .unwrap()
    }

    #[test]
    fn test_reordered_managers_map_by_id() {
        let model = StaticModel::new(vec![
            manager("Z", &["z1", "z2"]),
            manager("X", &["x1"]),
            manager("Y", &[]),
        ]);
        let doc = remote_xyz();
        let translator = IndexTranslator::new(&model, Some(&doc));

        assert_eq!(translator.local_to_remote_manager(0), Some(2));
        assert_eq!(translator.local_to_remote_manager(1), Some(0));
        assert_eq!(translator.local_to_remote_manager(2), Some(1));

        assert_eq!(translator.remote_to_local_manager(2), Some(0));
        assert_eq!(translator.remote_to_local_manager(0), Some(1));
    }

    #[test]
    fn test_backup_translation_uses_local_manager() {
        let model = StaticModel::new(vec![manager("Z", &["z1", "z2"]), manager("X", &["x1"])]);
        let doc = remote_xyz();
        let translator = IndexTranslator::new(&model, Some(&doc));

        assert_eq!(translator.local_to_remote_backup(0, 0), Some(1));
        assert_eq!(translator.local_to_remote_backup(0, 1), Some(0));
        assert_eq!(translator.remote_to_local_backup(2, 0), Some(1));
        assert_eq!(translator.remote_to_local_backup(0, 1), None);
    }

    #[test]
    fn test_missing_manager() {
        let model = StaticModel::new(vec![manager("W", &["w1"])]);
        let doc = remote_xyz();
        let translator = IndexTranslator::new(&model, Some(&doc));

        assert_eq!(translator.local_to_remote_manager(0), None);
        assert_eq!(translator.local_to_remote_backup(0, 0), None);
        assert_eq!(translator.to_remote_path("/s:brm/backup-manager/0/backup-type"), None);
    }

    #[test]
    fn test_without_document_is_identity() {
        let model = StaticModel::new(vec![manager("A", &[])]);
        let translator = IndexTranslator::new(&model, None);

        assert_eq!(translator.local_to_remote_manager(4), Some(4));
        assert_eq!(translator.local_to_remote_backup(4, 2), Some(2));
        assert_eq!(
            translator.to_remote_path("/s:brm/backup-manager/4/backup/2").as_deref(),
            Some("/s:brm/backup-manager/4/backup/2")
        );
    }

    #[test]
    fn test_path_rewrite_both_directions() {
        let model = StaticModel::new(vec![manager("Z", &["z1", "z2"]), manager("X", &["x1"])]);
        let doc = remote_xyz();
        let translator = IndexTranslator::new(&model, Some(&doc));

        assert_eq!(
            translator.to_remote_path("/s:brm/backup-manager/0/backup/0/status").as_deref(),
            Some("/s:brm/backup-manager/2/backup/1/status")
        );
        assert_eq!(
            translator.to_local_path("/s:brm/backup-manager/2/backup/1/status").as_deref(),
            Some("/s:brm/backup-manager/0/backup/0/status")
        );
        assert_eq!(
            translator.to_remote_path("/s:brm/backup-manager/1/backup/-").as_deref(),
            Some("/s:brm/backup-manager/0/backup/-")
        );
        assert_eq!(translator.to_local_path("/s:brm/backup-manager/1/backup-type"), None);
        assert_eq!(
            translator.to_remote_path("/s:brm/backup-manager/-").as_deref(),
            Some("/s:brm/backup-manager/-")
        );
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn document_for(ids: &[String]) -> ConfigurationDocument {
            let managers: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
            ConfigurationDocument::from_value(json!({
                "data": { "s:brm": { "backup-manager": managers } }
            }))
            .unwrap()
        }

        proptest! {
            #[test]
            fn remote_then_local_is_identity(
                ids in Just((0..8).map(|i| format!("bm-{i}")).collect::<Vec<_>>()).prop_shuffle()
            ) {
                let mut remote_order = ids.clone();
                remote_order.sort();
                let doc = document_for(&remote_order);
                let model = StaticModel::new(ids.iter().map(|id| manager(id, &[])).collect());
                let translator = IndexTranslator::new(&model, Some(&doc));

                for local in 0..ids.len() {
                    let remote = translator.local_to_remote_manager(local).unwrap();
                    prop_assert_eq!(&remote_order[remote], &ids[local]);
                    prop_assert_eq!(translator.remote_to_local_manager(remote), Some(local));
                }
            }
        }
    }
}
