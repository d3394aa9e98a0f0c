//! The `h1:` directory hash over file sets and module zips.
//!
//! The hash commits to file contents and names only: one line per file of
//! `hex(sha256(content))`, two spaces, the name, a newline; lines sorted by
//! name; `h1:` plus the base64 SHA-256 of the concatenated lines.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::Digest;
use sha2::Sha256;
use zip::ZipArchive;

use crate::error::{Result, SumdbError};

/// Hash a set of named files, reading each through `open`.
///
/// Names are sorted before hashing; names containing a newline are rejected
/// because they would break the line format.
pub fn hash_files<R, F>(names: &[&str], mut open: F) -> Result<String>
where
    R: Read,
    F: FnMut(&str) -> Result<R>,
{
    let mut sorted: Vec<&str> = names.to_vec();
    sorted.sort_unstable();

    let mut outer = Sha256::new();
    for name in sorted {
        if name.contains('\n') {
            return Err(SumdbError::Internal {
                message: format!("filename {name:?} contains a newline"),
            });
        }
        let mut reader = open(name)?;
        let digest = hash_reader(&mut reader)?;
        outer.update(format!("{digest:x}  {name}\n"));
    }
    Ok(format!("h1:{}", BASE64.encode(outer.finalize())))
}

/// Hash a `go.mod` body: the file set is exactly `{("go.mod", body)}`.
pub fn hash_gomod(body: &[u8]) -> Result<String> {
    let mut source = Some(body);
    hash_files(&["go.mod"], |_| {
        source.take().ok_or_else(|| SumdbError::Internal {
            message: "go.mod opened twice".into(),
        })
    })
}

/// Hash a module zip on disk.
///
/// Every entry must live under `<prefix>/` (canonically
/// `<path>@<version>/`); the prefix is validated and stripped before the
/// line set is built. Entries stream through SHA-256, so memory use is
/// independent of zip size.
pub fn hash_zip(zip_path: &Path, prefix: &str) -> Result<String> {
    let file = File::open(zip_path).map_err(|e| SumdbError::Internal {
        message: format!("open zip: {e}"),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| SumdbError::Internal {
        message: format!("read zip: {e}"),
    })?;

    let want = format!("{prefix}/");
    let mut files: Vec<(String, sha2::digest::Output<Sha256>)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| SumdbError::Internal {
            message: format!("read zip entry: {e}"),
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry
            .name()
            .strip_prefix(&want)
            .ok_or_else(|| SumdbError::Internal {
                message: format!("zip entry {:?} is not under {want:?}", entry.name()),
            })?
            .to_string();
        if name.is_empty() || name.contains('\n') {
            return Err(SumdbError::Internal {
                message: format!("zip entry {:?} has an invalid name", entry.name()),
            });
        }
        let digest = hash_reader(&mut entry)?;
        files.push((name, digest));
    }

    // Lines are ordered by file name, as in hash_files; sorting the
    // rendered lines would order by digest instead.
    files.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    let mut outer = Sha256::new();
    for (name, digest) in &files {
        outer.update(format!("{digest:x}  {name}\n"));
    }
    Ok(format!("h1:{}", BASE64.encode(outer.finalize())))
}

fn hash_reader(reader: &mut impl Read) -> Result<sha2::digest::Output<Sha256>> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| SumdbError::Internal {
            message: format!("read for hashing: {e}"),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;
    use zip::ZipWriter;

    fn write_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_hash_gomod_known_vector() {
        // sha256("module x\n") then the single-line summary, by hand:
        // the construction is equivalent to
        //   h1:base64(sha256(hex(sha256(body)) ++ "  go.mod\n"))
        let body = b"module x\n";
        let inner = Sha256::digest(body);
        let line = format!("{inner:x}  go.mod\n");
        let expected = format!("h1:{}", BASE64.encode(Sha256::digest(line.as_bytes())));
        assert_eq!(hash_gomod(body).unwrap(), expected);
    }

    #[test]
    fn test_hash_files_sorted_by_name() {
        let open = |name: &str| -> Result<Cursor<Vec<u8>>> { Ok(Cursor::new(name.as_bytes().to_vec())) };
        let a = hash_files(&["b.txt", "a.txt"], open).unwrap();
        let b = hash_files(&["a.txt", "b.txt"], open).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_files_rejects_newline_names() {
        assert!(hash_files(&["bad\nname"], |_| Ok(Cursor::new(Vec::new()))).is_err());
    }

    #[test]
    fn test_hash_zip_matches_hash_files() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("m.zip");
        let bytes = write_zip(&[
            ("example.com/m@v1.0.0/go.mod", b"module example.com/m\n"),
            ("example.com/m@v1.0.0/main.go", b"package main\n"),
        ]);
        std::fs::write(&zip_path, bytes).unwrap();

        let from_zip = hash_zip(&zip_path, "example.com/m@v1.0.0").unwrap();

        let contents: std::collections::HashMap<&str, &[u8]> = [
            ("go.mod", b"module example.com/m\n" as &[u8]),
            ("main.go", b"package main\n"),
        ]
        .into();
        let from_files = hash_files(&["go.mod", "main.go"], |name| {
            Ok(Cursor::new(contents[name].to_vec()))
        })
        .unwrap();

        assert_eq!(from_zip, from_files);
    }

    #[test]
    fn test_hash_zip_sorts_by_name_not_digest() {
        // sha256("package a\n") starts 7b39…, sha256("x") starts 2d71…, so
        // digest order is the reverse of name order for these entries.
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("m.zip");
        let bytes = write_zip(&[("m@v1/a.go", b"package a\n"), ("m@v1/b.go", b"x")]);
        std::fs::write(&zip_path, bytes).unwrap();

        let from_zip = hash_zip(&zip_path, "m@v1").unwrap();

        let contents: std::collections::HashMap<&str, &[u8]> =
            [("a.go", b"package a\n" as &[u8]), ("b.go", b"x")].into();
        let from_files =
            hash_files(&["a.go", "b.go"], |name| Ok(Cursor::new(contents[name].to_vec()))).unwrap();

        assert_eq!(from_zip, from_files);
    }

    #[test]
    fn test_hash_zip_rejects_foreign_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("m.zip");
        let bytes = write_zip(&[("example.com/other@v1.0.0/go.mod", b"module x\n")]);
        std::fs::write(&zip_path, bytes).unwrap();

        assert!(hash_zip(&zip_path, "example.com/m@v1.0.0").is_err());
    }

    #[test]
    fn test_hash_zip_entry_order_is_irrelevant() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.zip");
        let b_path = dir.path().join("b.zip");
        std::fs::write(
            &a_path,
            write_zip(&[("m@v1/x.go", b"x"), ("m@v1/y.go", b"y")]),
        )
        .unwrap();
        std::fs::write(
            &b_path,
            write_zip(&[("m@v1/y.go", b"y"), ("m@v1/x.go", b"x")]),
        )
        .unwrap();

        assert_eq!(hash_zip(&a_path, "m@v1").unwrap(), hash_zip(&b_path, "m@v1").unwrap());
    }
}
