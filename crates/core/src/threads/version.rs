//! Content hash over a thread's state.
//!
//! Every field is length-prefixed so adjacent values can never run together.
//! Timestamps, the owner and storage bookkeeping are not part of the hash.

use sha2::{Digest, Sha256};

use super::threads_model::Thread;

const DOMAIN: &[u8] = b"threadmem.thread.v1";

/// Lowercase hex SHA-256 of the thread's hashed state.
pub fn compute_version(thread: &Thread) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);

    match thread.name() {
        Some(name) => {
            hasher.update([1u8]);
            field(&mut hasher, name.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update([thread.is_public() as u8]);

    count(&mut hasher, thread.metadata().len());
    for (key, value) in thread.metadata() {
        field(&mut hasher, key.as_bytes());
        field(&mut hasher, value.to_string().as_bytes());
    }

    let roles = thread.roles();
    hasher.update([roles.is_open() as u8]);
    for list in [roles.registered(), roles.retired()] {
        count(&mut hasher, list.len());
        for role in list {
            field(&mut hasher, role.as_bytes());
        }
    }

    let messages = thread.all_messages();
    count(&mut hasher, messages.len());
    for message in messages {
        field(&mut hasher, message.id.as_bytes());
        field(&mut hasher, message.role.as_bytes());
        field(&mut hasher, message.text.as_bytes());
        hasher.update([message.private as u8]);
        count(&mut hasher, message.images.len());
        for image in &message.images {
            field(&mut hasher, image.id().as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

fn count(hasher: &mut Sha256, n: usize) {
    hasher.update((n as u64).to_be_bytes());
}

fn field(hasher: &mut Sha256, bytes: &[u8]) {
    count(hasher, bytes.len());
    hasher.update(bytes);
}
