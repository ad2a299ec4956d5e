//! In-place gzip of pipeline artifacts

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

/// `{path}.gz`
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress `path` at maximum level into `{path}.gz` and remove the original.
///
/// An existing `.gz` is overwritten. The archive is written under a temporary
/// name and renamed into place, so `{path}.gz` never exists half-written.
pub fn gzip_file(path: &Path) -> io::Result<PathBuf> {
    let target = gz_path(path);
    let mut partial = target.as_os_str().to_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&partial)?), Compression::best());
    io::copy(&mut input, &mut encoder)?;
    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    std::fs::rename(&partial, &target)?;
    std::fs::remove_file(path)?;
    Ok(target)
}

/// [`gzip_file`] on the blocking pool
pub async fn gzip_file_async(path: PathBuf) -> io::Result<PathBuf> {
    tokio::task::spawn_blocking(move || gzip_file(&path))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("jerry-i1-bug.cgt");
        std::fs::write(&trace, "## START PROGRAM\nmain-->f\n## QUIT PROGRAM\n").unwrap();

        let gz = gzip_file(&trace).unwrap();

        assert_eq!(gz, dir.path().join("jerry-i1-bug.cgt.gz"));
        assert!(!trace.exists());
        assert!(!dir.path().join("jerry-i1-bug.cgt.gz.partial").exists());

        let mut text = String::new();
        GzDecoder::new(File::open(&gz).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "## START PROGRAM\nmain-->f\n## QUIT PROGRAM\n");
    }

    #[test]
    fn test_gzip_overwrites_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("graph.json");
        std::fs::write(dir.path().join("graph.json.gz"), "stale").unwrap();
        std::fs::write(&file, "{}").unwrap();

        let gz = gzip_file(&file).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(gz).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "{}");
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(gzip_file(&dir.path().join("absent")).is_err());
    }

    #[tokio::test]
    async fn test_async_variant() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.graphml");
        std::fs::write(&file, "<graphml/>").unwrap();

        let gz = gzip_file_async(file.clone()).await.unwrap();
        assert!(gz.exists());
        assert!(!file.exists());
    }
}
