//! Screenshot bucket store rules.
//!
//! The database layer takes a row lock on the bucket and then asks these
//! functions what to do, so every state change of a bucket goes through a
//! single serialized decision.

use uuid::Uuid;

use crate::models::ScreenshotBucket;

/// Bucket store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketError {
    /// A completion count disagrees with what is attached or already recorded.
    #[error("bucket {bucket_id} completion conflict: expected {expected}, {reason}")]
    CountConflict {
        bucket_id: Uuid,
        expected: i32,
        reason: String,
    },

    /// The bucket is complete and can no longer receive screenshots.
    #[error("bucket {0} is complete and immutable")]
    Immutable(Uuid),

    /// Same screenshot name uploaded twice with different content.
    #[error("screenshot '{name}' already uploaded to bucket {bucket_id} with a different checksum")]
    DuplicateName { bucket_id: Uuid, name: String },
}

/// What completing a bucket must write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Flip `complete` and set `screenshot_count`.
    Complete { screenshot_count: i32 },
    /// Already complete with the same count.
    Unchanged,
}

/// Decide the outcome of completing `bucket` with `expected` screenshots, given
/// the number of screenshots currently attached to it.
pub fn resolve_completion(
    bucket: &ScreenshotBucket,
    attached: u64,
    expected: i32,
) -> Result<Completion, BucketError> {
    if expected < 0 {
        return Err(BucketError::CountConflict {
            bucket_id: bucket.id,
            expected,
            reason: "count must not be negative".to_string(),
        });
    }

    if bucket.complete {
        return match bucket.screenshot_count {
            Some(count) if count == expected => Ok(Completion::Unchanged),
            Some(count) => Err(BucketError::CountConflict {
                bucket_id: bucket.id,
                expected,
                reason: format!("bucket already completed with {}", count),
            }),
            // Unreachable with the table CHECK in place
            None => Err(BucketError::CountConflict {
                bucket_id: bucket.id,
                expected,
                reason: "bucket is complete without a count".to_string(),
            }),
        };
    }

    if attached != expected as u64 {
        return Err(BucketError::CountConflict {
            bucket_id: bucket.id,
            expected,
            reason: format!("{} screenshots attached", attached),
        });
    }

    Ok(Completion::Complete {
        screenshot_count: expected,
    })
}

/// What appending one screenshot must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Insert a new screenshot row.
    Insert,
    /// The identical screenshot is already attached.
    AlreadyAttached(Uuid),
}

/// Decide whether `name` with `checksum` may be attached to `bucket`.
///
/// `existing` is the screenshot already attached under the same name, as
/// `(id, checksum)`.
pub fn resolve_append(
    bucket: &ScreenshotBucket,
    name: &str,
    checksum: &str,
    existing: Option<(Uuid, &str)>,
) -> Result<Append, BucketError> {
    if bucket.complete {
        return Err(BucketError::Immutable(bucket.id));
    }

    match existing {
        None => Ok(Append::Insert),
        Some((id, existing_checksum)) if existing_checksum.eq_ignore_ascii_case(checksum) => {
            Ok(Append::AlreadyAttached(id))
        }
        Some(_) => Err(BucketError::DuplicateName {
            bucket_id: bucket.id,
            name: name.to_string(),
        }),
    }
}
