//! Named, ordered list of patch records.

use crate::patch::PatchRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct PatchList {
    id: String,
    name: String,
    patches: Vec<PatchRecord>,
}

impl PatchList {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            patches: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patches(&self) -> &[PatchRecord] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn set_patches(&mut self, patches: Vec<PatchRecord>) {
        self.patches = patches;
    }

    pub fn add_patch(&mut self, patch: PatchRecord) {
        self.patches.push(patch);
    }
}
