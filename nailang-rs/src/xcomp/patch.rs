//! Patched blocks: helper snippets injected ahead of the generated code.
//!
//! Each patch has an id, its text and the ids it depends on.  Patches are
//! written so that every patch follows its dependencies; otherwise in the
//! order they were added.

use std::fmt::Write;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("self dependency at [{index}] for [{id}]")]
    SelfDependency { index: usize, id: String },
    #[error("unsolved dependency [{dep}] for [{id}]")]
    Unsolved { dep: String, id: String },
    /// Patches left over after every resolvable one was written.
    #[error("unmatched dependencies:\r\n{0}")]
    Cyclic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub id: String,
    pub content: String,
    pub depends: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Patch> {
        self.patches.iter().find(|p| p.id == id)
    }

    /// Add a patch.  Returns `false` when `id` is already present, in which
    /// case the existing patch is kept.
    pub fn add(&mut self, id: &str, content: impl Into<String>, depends: &[&str]) -> Result<bool, PatchError> {
        if let Some(index) = depends.iter().position(|d| *d == id) {
            return Err(PatchError::SelfDependency { index, id: id.to_owned() });
        }
        if self.get(id).is_some() {
            tracing::trace!(id, "patch already present");
            return Ok(false);
        }
        self.patches.push(Patch {
            id: id.to_owned(),
            content: content.into(),
            depends: depends.iter().map(|d| (*d).to_owned()).collect(),
        });
        Ok(true)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.id == id)
    }

    /// Append every patch to `out` in dependency order.
    pub fn write(&self, out: &mut String) -> Result<(), PatchError> {
        for patch in &self.patches {
            if let Some(dep) = patch.depends.iter().find(|d| self.index_of(d).is_none()) {
                return Err(PatchError::Unsolved { dep: dep.clone(), id: patch.id.clone() });
            }
        }

        let mut written = vec![false; self.patches.len()];
        let mut waiting = self.patches.len();
        while waiting > 0 {
            let before = waiting;
            for (i, patch) in self.patches.iter().enumerate() {
                if written[i] {
                    continue;
                }
                let ready = patch.depends.iter().all(|d| self.index_of(d).is_some_and(|j| written[j]));
                if !ready {
                    continue;
                }
                write_patch(out, patch);
                written[i] = true;
                waiting -= 1;
            }
            if before == waiting {
                break;
            }
        }
        if waiting == 0 {
            return Ok(());
        }

        let mut report = String::new();
        for (patch, _) in self.patches.iter().zip(&written).filter(|(_, done)| !**done) {
            let pending: Vec<&str> = patch
                .depends
                .iter()
                .filter(|d| self.index_of(d).is_some_and(|j| !written[j]))
                .map(String::as_str)
                .collect();
            let _ = write!(
                report,
                "[{}]: total [{}] depends, unmatch:[ {} ]\r\n",
                patch.id,
                patch.depends.len(),
                pending.join(", ")
            );
        }
        Err(PatchError::Cyclic(report))
    }
}

fn write_patch(out: &mut String, patch: &Patch) {
    let _ = write!(out, "/* Patched Block [{}] */\r\n", patch.id);
    out.push_str(&patch.content);
    out.push_str("\r\n\r\n");
}
