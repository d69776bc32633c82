//! Short shareable task codes.
//!
//! A code is six characters drawn from `[A-Z0-9]`. Codes let a student open a
//! task straight from a link (`?taskCode=ABC123`) before they have a student id.
//! Uniqueness is only enforced inside one partition and only on a best-effort
//! basis: after `MAX_UNIQUE_ATTEMPTS` collisions the next draw is accepted as is.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::session::Partition;
use crate::storage::{read_json, write_json, BlobStore};

pub const CODE_LEN: usize = 6;
pub const MAX_UNIQUE_ATTEMPTS: usize = 100;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw one code uniformly from the 36-symbol alphabet. Not cryptographically secure.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
  (0..CODE_LEN)
    .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
    .collect()
}

/// Exactly six ASCII alphanumerics; case-insensitive.
pub fn is_valid_format(code: &str) -> bool {
  code.len() == CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// `ABC123` -> `ABC-123`. Anything that is not six bytes long is returned unchanged.
pub fn format_for_display(code: &str) -> String {
  if code.len() != CODE_LEN || !code.is_ascii() {
    return code.to_string();
  }
  format!("{}-{}", &code[..3], &code[3..])
}

/// Uppercase, trim and drop the display hyphen.
pub fn normalize(code: &str) -> String {
  code
    .trim()
    .chars()
    .filter(|c| *c != '-')
    .map(|c| c.to_ascii_uppercase())
    .collect()
}

pub fn generate_unique<R: Rng + ?Sized>(existing: &HashSet<String>, rng: &mut R) -> String {
  generate_unique_with(existing, || generate_code(&mut *rng))
}

/// Rejection-sample `draw` against `existing`. Falls back to one more unchecked draw
/// once the attempt budget is spent.
pub fn generate_unique_with<F>(existing: &HashSet<String>, mut draw: F) -> String
where
  F: FnMut() -> String,
{
  for attempt in 0..MAX_UNIQUE_ATTEMPTS {
    let code = draw();
    if !existing.contains(&code) {
      debug!(target: "task_codes", attempt, "unique task code generated");
      return code;
    }
  }
  let code = draw();
  warn!(
    target: "task_codes",
    attempts = MAX_UNIQUE_ATTEMPTS,
    existing = existing.len(),
    "Could not generate a unique task code; accepting a possibly duplicate code"
  );
  code
}

fn storage_key(partition: &Partition) -> String {
  format!("lara-task-codes-{}", partition.key())
}

/// Persisted `code -> task id` map, one blob per partition.
#[derive(Clone)]
pub struct TaskCodeRegistry {
  blobs: Arc<dyn BlobStore>,
}

impl TaskCodeRegistry {
  pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
    Self { blobs }
  }

  #[instrument(level = "debug", skip(self), fields(partition = %partition.key()))]
  pub fn save_mapping(&self, partition: &Partition, code: &str, task_id: &str) -> Result<()> {
    let key = storage_key(partition);
    let mut map = self.all_codes(partition)?;
    map.insert(normalize(code), task_id.to_string());
    write_json(self.blobs.as_ref(), &key, &map)
  }

  /// Case-insensitive lookup. Unknown codes resolve to `None`.
  pub fn resolve(&self, partition: &Partition, code: &str) -> Result<Option<String>> {
    let map = self.all_codes(partition)?;
    Ok(map.get(&normalize(code)).cloned())
  }

  pub fn all_codes(&self, partition: &Partition) -> Result<BTreeMap<String, String>> {
    let key = storage_key(partition);
    Ok(read_json(self.blobs.as_ref(), &key)?.unwrap_or_default())
  }

  pub fn clear(&self, partition: &Partition) -> Result<()> {
    self.blobs.remove(&storage_key(partition))
  }
}
