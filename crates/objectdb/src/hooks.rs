//! Hook registry. Synchronous callables fired around attribute and
//! object mutations, inside the same write transaction. This is the
//! mechanism by which link attributes stay bidirectionally consistent and
//! tables keep their denormalized `idx` column current.
//!
//! The registry is owned by [`crate::Database`] rather than kept as process
//! `static` state: a `Database` is already the process-wide handle callers
//! share, and threading the registry through it avoids unsafe global mutable
//! statics for what is, in every caller's view, per-database state anyway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::database::Database;
use crate::error::{collect_hook_errors, Result};
use crate::id::{AttributeClassId, ObjectId};
use crate::txn::WriteTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

/// Describes one mutation of attribute `class_id` on `object`, for hooks
/// registered against that class.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub class_id: AttributeClassId,
    pub object: ObjectId,
    pub kind: OpKind,
}

pub type AttrHook = Arc<dyn Fn(&Database, &WriteTx<'_>, &Op) -> Result<()> + Send + Sync>;
pub type ObjectHook = Arc<dyn Fn(&Database, &WriteTx<'_>, ObjectId) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    pre_attr: Mutex<HashMap<AttributeClassId, AttrHook>>,
    after_attr: Mutex<HashMap<AttributeClassId, AttrHook>>,
    pre_update_obj: Mutex<Vec<ObjectHook>>,
    after_update_obj: Mutex<Vec<ObjectHook>>,
    pre_delete_obj: Mutex<Vec<ObjectHook>>,
    after_delete_obj: Mutex<Vec<ObjectHook>>,
}

impl HookRegistry {
    pub fn register_pre_attr(&self, class_id: AttributeClassId, hook: AttrHook) {
        self.pre_attr.lock().unwrap().insert(class_id, hook);
    }

    pub fn register_after_attr(&self, class_id: AttributeClassId, hook: AttrHook) {
        self.after_attr.lock().unwrap().insert(class_id, hook);
    }

    /// Drops both slots for `class_id`. Called when an attribute class is
    /// dropped.
    pub fn unregister_attr(&self, class_id: AttributeClassId) {
        self.pre_attr.lock().unwrap().remove(&class_id);
        self.after_attr.lock().unwrap().remove(&class_id);
    }

    pub fn push_pre_update_obj(&self, hook: ObjectHook) {
        self.pre_update_obj.lock().unwrap().push(hook);
    }

    pub fn push_after_update_obj(&self, hook: ObjectHook) {
        self.after_update_obj.lock().unwrap().push(hook);
    }

    pub fn push_pre_delete_obj(&self, hook: ObjectHook) {
        self.pre_delete_obj.lock().unwrap().push(hook);
    }

    pub fn push_after_delete_obj(&self, hook: ObjectHook) {
        self.after_delete_obj.lock().unwrap().push(hook);
    }

    pub fn fire_pre_attr(&self, db: &Database, tx: &WriteTx<'_>, op: &Op) -> Result<()> {
        let hook = self.pre_attr.lock().unwrap().get(&op.class_id).cloned();
        match hook {
            Some(hook) => hook(db, tx, op),
            None => Ok(()),
        }
    }

    /// Runs every registered after-attr hook, not just the one keyed under
    /// `op.class_id`: a link class's hook also has to react to edits of its
    /// *dependency* classes (to refresh a cached display string), and it is
    /// registered only under its own class id, so firing has to fan out to
    /// every hook and let each one self-filter on `op`.
    pub fn fire_after_attr(&self, db: &Database, tx: &WriteTx<'_>, op: &Op) -> Result<()> {
        let hooks: Vec<AttrHook> = self.after_attr.lock().unwrap().values().cloned().collect();
        collect_hook_errors(hooks, |hook| hook(db, tx, op))
    }

    pub fn fire_pre_update_obj(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
        let hooks = self.pre_update_obj.lock().unwrap().clone();
        collect_hook_errors(hooks, |hook| hook(db, tx, oid))
    }

    pub fn fire_after_update_obj(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
        let hooks = self.after_update_obj.lock().unwrap().clone();
        collect_hook_errors(hooks, |hook| hook(db, tx, oid))
    }

    pub fn fire_pre_delete_obj(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
        let hooks = self.pre_delete_obj.lock().unwrap().clone();
        collect_hook_errors(hooks, |hook| hook(db, tx, oid))
    }

    pub fn fire_after_delete_obj(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
        let hooks = self.after_delete_obj.lock().unwrap().clone();
        collect_hook_errors(hooks, |hook| hook(db, tx, oid))
    }

    /// Clears every registered hook. Test-only: lets a test suite reuse one
    /// `Database` across cases without hooks from one case leaking into the
    /// next.
    #[cfg(any(test, feature = "test-support"))]
    pub fn reset(&self) {
        self.pre_attr.lock().unwrap().clear();
        self.after_attr.lock().unwrap().clear();
        self.pre_update_obj.lock().unwrap().clear();
        self.after_update_obj.lock().unwrap().clear();
        self.pre_delete_obj.lock().unwrap().clear();
        self.after_delete_obj.lock().unwrap().clear();
    }
}
