//! Result of rendering a kernel template program.

use std::path::{Path, PathBuf};

/// A named piece of output, one per kernel block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedProgram {
    /// Patched blocks followed by every rendered block.
    pub source: String,
    /// Kernel blocks, in program order.
    pub artifacts: Vec<Artifact>,
}

impl GeneratedProgram {
    pub fn artifact(&self, name: &str) -> Option<&str> {
        self.artifacts.iter().find(|a| a.name == name).map(|a| a.content.as_str())
    }

    /// Write the source to `path`, and each artifact next to it as
    /// `<stem>.<name>.<ext>`.  Returns every path written.
    pub fn write_to(&self, path: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::write(path, &self.source)?;
        let mut written = vec![path.to_path_buf()];
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = path.extension().map(|s| s.to_string_lossy().into_owned());
        for artifact in &self.artifacts {
            let file = match &ext {
                Some(ext) => format!("{stem}.{}.{ext}", artifact.name),
                None => format!("{stem}.{}", artifact.name),
            };
            let target = path.with_file_name(file);
            std::fs::write(&target, &artifact.content)?;
            written.push(target);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_land_next_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let program = GeneratedProgram {
            source: "all".into(),
            artifacts: vec![Artifact { name: "k".into(), content: "kernel".into() }],
        };
        let out = dir.path().join("prog.cl");
        let written = program.write_to(&out).unwrap();
        assert_eq!(written, [out.clone(), dir.path().join("prog.k.cl")]);
        assert_eq!(std::fs::read_to_string(&written[1]).unwrap(), "kernel");
        assert_eq!(program.artifact("k"), Some("kernel"));
        assert_eq!(program.artifact("none"), None);
    }
}
