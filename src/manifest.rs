//! Manifest (spec §3): sent once per transfer, before any bytes.
//!
//! Grounded on the teacher's `protocol::FileList`/`FileMetadata`,
//! generalized with `root_name`/`is_folder`/`is_size_estimated` and a
//! `transfer_id`, and split from the payload-carrying `FileData` (the
//! manifest never carries file bytes; the teacher's `FileList` mixed
//! the two).

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub id: u16,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub transfer_id: String,
    pub root_name: String,
    pub is_folder: bool,
    pub total_files: u32,
    pub total_size: u64,
    pub files: Vec<ManifestFile>,
    pub is_size_estimated: bool,
}

impl Manifest {
    /// Build a manifest from an ordered list of `(relative_path, size)`
    /// inputs. File `id` is the 0-based index into `inputs`, per spec §3.
    pub fn for_inputs(
        transfer_id: String,
        root_name: String,
        is_folder: bool,
        inputs: &[(String, u64)],
        is_size_estimated: bool,
    ) -> Self {
        let files: Vec<ManifestFile> = inputs
            .iter()
            .enumerate()
            .map(|(idx, (path, size))| ManifestFile {
                id: idx as u16,
                path: path.clone(),
                size: *size,
            })
            .collect();
        let total_size = files.iter().map(|f| f.size).sum();
        Self {
            transfer_id,
            root_name,
            is_folder,
            total_files: files.len() as u32,
            total_size,
            files,
            is_size_estimated,
        }
    }

    /// Generate a fresh transfer id: a 16-character lowercase base-36
    /// token, distinct from the 6-character uppercase room id (spec §6).
    pub fn generate_transfer_id() -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        (0..16)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }
}
