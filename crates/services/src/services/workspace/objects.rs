//! Object model for the content-addressed workspace: blobs, trees and
//! commits encoded as `{kind} {len}\0{body}` and addressed by the SHA-256 of
//! the encoded bytes.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Malformed object header")]
    MalformedHeader,
    #[error("Malformed {0} body: {1}")]
    MalformedBody(&'static str, String),
    #[error("Unknown object kind: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ObjectError> {
        match value {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            "commit" => Ok(ObjectKind::Commit),
            "tag" => Ok(ObjectKind::Tag),
            other => Err(ObjectError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Unix timestamp in whole seconds.
    pub timestamp: i64,
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: ObjectKind,
    pub oid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitObject {
    pub tree: String,
    pub parents: Vec<String>,
    pub author: Signature,
    pub message: String,
}

pub fn hash_object(kind: ObjectKind, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(body.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let mut out = String::new();
    for entry in sorted {
        out.push_str(&format!(
            "{} {} {}\t{}\n",
            entry.mode,
            entry.kind.as_str(),
            entry.oid,
            entry.name
        ));
    }
    out.into_bytes()
}

pub fn decode_tree(body: &[u8]) -> Result<Vec<TreeEntry>, ObjectError> {
    let text = String::from_utf8(body.to_vec())
        .map_err(|err| ObjectError::MalformedBody("tree", err.to_string()))?;
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (meta, name) = line
            .split_once('\t')
            .ok_or_else(|| ObjectError::MalformedBody("tree", line.to_string()))?;
        let mut parts = meta.splitn(3, ' ');
        let mode = parts
            .next()
            .ok_or_else(|| ObjectError::MalformedBody("tree", line.to_string()))?;
        let kind = parts
            .next()
            .ok_or_else(|| ObjectError::MalformedBody("tree", line.to_string()))?;
        let oid = parts
            .next()
            .ok_or_else(|| ObjectError::MalformedBody("tree", line.to_string()))?;
        entries.push(TreeEntry {
            mode: mode.to_string(),
            kind: ObjectKind::parse(kind)?,
            oid: oid.to_string(),
            name: name.to_string(),
        });
    }
    Ok(entries)
}

pub fn encode_commit(commit: &CommitObject) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("tree {}\n", commit.tree));
    for parent in &commit.parents {
        out.push_str(&format!("parent {parent}\n"));
    }
    out.push_str(&format!(
        "author {} <{}> {}\n",
        commit.author.name, commit.author.email, commit.author.timestamp
    ));
    out.push('\n');
    out.push_str(&commit.message);
    out.into_bytes()
}

pub fn decode_commit(body: &[u8]) -> Result<CommitObject, ObjectError> {
    let text = String::from_utf8(body.to_vec())
        .map_err(|err| ObjectError::MalformedBody("commit", err.to_string()))?;
    let (headers, message) = text
        .split_once("\n\n")
        .ok_or_else(|| ObjectError::MalformedBody("commit", "missing message".to_string()))?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    for line in headers.lines() {
        if let Some(oid) = line.strip_prefix("tree ") {
            tree = Some(oid.to_string());
        } else if let Some(oid) = line.strip_prefix("parent ") {
            parents.push(oid.to_string());
        } else if let Some(rest) = line.strip_prefix("author ") {
            author = Some(parse_signature(rest)?);
        }
    }

    Ok(CommitObject {
        tree: tree
            .ok_or_else(|| ObjectError::MalformedBody("commit", "missing tree".to_string()))?,
        parents,
        author: author
            .ok_or_else(|| ObjectError::MalformedBody("commit", "missing author".to_string()))?,
        message: message.to_string(),
    })
}

fn parse_signature(raw: &str) -> Result<Signature, ObjectError> {
    // "{name} <{email}> {timestamp}"
    let open = raw
        .rfind('<')
        .ok_or_else(|| ObjectError::MalformedBody("commit", raw.to_string()))?;
    let close = raw
        .rfind('>')
        .ok_or_else(|| ObjectError::MalformedBody("commit", raw.to_string()))?;
    let name = raw[..open].trim().to_string();
    let email = raw[open + 1..close].to_string();
    let timestamp = raw[close + 1..]
        .trim()
        .parse::<i64>()
        .map_err(|err| ObjectError::MalformedBody("commit", err.to_string()))?;
    Ok(Signature {
        name,
        email,
        timestamp,
    })
}

/// Heuristic used when reading blobs back out: anything containing a NUL
/// byte is treated as binary and skipped by text readers.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bodies_hash_identically() {
        let a = hash_object(ObjectKind::Blob, b"hello world");
        let b = hash_object(ObjectKind::Blob, b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, hash_object(ObjectKind::Blob, b"hello worlds"));
        // Kind participates in the hash.
        assert_ne!(a, hash_object(ObjectKind::Tree, b"hello world"));
    }

    #[test]
    fn tree_roundtrip_is_sorted_and_stable() {
        let entries = vec![
            TreeEntry {
                mode: "100644".to_string(),
                kind: ObjectKind::Blob,
                oid: "b".repeat(64),
                name: "zeta.ts".to_string(),
            },
            TreeEntry {
                mode: "040000".to_string(),
                kind: ObjectKind::Tree,
                oid: "a".repeat(64),
                name: "src".to_string(),
            },
        ];
        let body = encode_tree(&entries);
        let decoded = decode_tree(&body).unwrap();
        assert_eq!(decoded[0].name, "src");
        assert_eq!(decoded[1].name, "zeta.ts");
        assert_eq!(encode_tree(&decoded), body);
    }

    #[test]
    fn commit_roundtrip_preserves_parents_and_message() {
        let commit = CommitObject {
            tree: "c".repeat(64),
            parents: vec!["d".repeat(64), "e".repeat(64)],
            author: Signature {
                name: "Vibesdk".to_string(),
                email: "vibesdk-bot@users.noreply.github.com".to_string(),
                timestamp: 1_720_000_000,
            },
            message: "feat: First Phase\n\nBody text".to_string(),
        };
        let decoded = decode_commit(&encode_commit(&commit)).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn binary_detection_uses_nul_byte() {
        assert!(is_binary(b"\x89PNG\r\n\x1a\n\0\0"));
        assert!(!is_binary("plain text\n".as_bytes()));
    }
}
