//! Tarball helpers for the build artifacts archive.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Append `files` to the tar archive at `archive`, each stored as
/// `<prefix>/<file name>`.
///
/// The archive is rewritten: existing members are streamed into a new
/// archive followed by the extra files, then the new archive replaces the
/// old one. A missing archive is created.
pub fn append_to_tarball(archive: &Path, files: &[&Path], prefix: &str) -> Result<()> {
    let staged = archive.with_extension("tar.partial");
    let out = File::create(&staged)
        .with_context(|| format!("Failed to create {}", staged.display()))?;
    let mut builder = tar::Builder::new(out);

    if archive.exists() {
        let input =
            File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
        let mut existing = tar::Archive::new(input);
        for entry in existing
            .entries()
            .with_context(|| format!("Failed to read {}", archive.display()))?
        {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let mut header = entry.header().clone();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            builder.append_data(&mut header, &path, data.as_slice())?;
        }
    }

    for file in files {
        let name = file
            .file_name()
            .with_context(|| format!("{} has no file name", file.display()))?;
        let member = Path::new(prefix).join(name);
        builder
            .append_path_with_name(file, &member)
            .with_context(|| format!("Failed to add {} to archive", file.display()))?;
    }

    builder.into_inner()?.sync_all()?;
    fs::rename(&staged, archive)
        .with_context(|| format!("Failed to replace {}", archive.display()))?;
    Ok(())
}

/// Member paths of a tar archive, in order.
pub fn list_members(archive: &Path) -> Result<Vec<String>> {
    let input =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut tar = tar::Archive::new(input);
    let mut names = Vec::new();
    for entry in tar.entries()? {
        names.push(entry?.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_keeps_existing_members() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("fw.tar");
        let first = tmp.path().join("image.bin");
        fs::write(&first, "firmware").unwrap();
        append_to_tarball(&archive, &[&first], "out").unwrap();

        let log = tmp.path().join("build.log");
        fs::write(&log, "log").unwrap();
        append_to_tarball(&archive, &[&log], "out").unwrap();

        let members = list_members(&archive).unwrap();
        assert_eq!(members, ["out/image.bin", "out/build.log"]);
    }
}
