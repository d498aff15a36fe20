pub mod consts;
pub mod logging;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Cut `data` into `size`-byte payloads, zero padding the last one
pub fn split_payloads(data: &[u8], size: usize) -> Vec<Vec<u8>> {
    if size == 0 {
        return Vec::new();
    }
    data.chunks(size)
        .map(|chunk| {
            let mut payload = chunk.to_vec();
            payload.resize(size, 0);
            payload
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_payloads_pads_last() {
        let payloads = split_payloads(b"abcdefg", 3);
        assert_eq!(payloads, vec![b"abc".to_vec(), b"def".to_vec(), vec![b'g', 0, 0]]);
        assert!(split_payloads(b"", 3).is_empty());
    }
}
