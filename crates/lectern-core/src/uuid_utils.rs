//! UUID v7 identifiers.
//!
//! Every lectern row id is a UUIDv7: the leading 48 bits are a millisecond
//! timestamp, so primary-key order follows creation order and index inserts
//! stay append-mostly.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use lectern_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert_ne!(a, b);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_version_7() {
        let id = new_v7();
        assert!(is_v7(&id));
    }

    #[test]
    fn test_v7_ordering() {
        let id1 = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = new_v7();

        // Later UUIDs should be greater
        assert!(id2 > id1);
    }

    #[test]
    fn test_v4_is_not_v7() {
        assert!(!is_v7(&Uuid::new_v4()));
    }
}
