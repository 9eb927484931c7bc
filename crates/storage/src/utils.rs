//! Utility functions for storage operations.

/// Maximum number of bound parameters per `IN (...)` query.
///
/// SQLite limits the number of parameters in a statement (typically 999,
/// SQLITE_MAX_VARIABLE_NUMBER). 500 stays safely below it and leaves room for
/// the other parameters of the query. Postgres uses the same chunking.
pub const MAX_PARAMS_CHUNK: usize = 500;

/// Chunk a slice for batched `IN (...)` queries.
pub fn chunk_params<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(MAX_PARAMS_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_params_empty() {
        let items: Vec<i32> = vec![];
        assert_eq!(chunk_params(&items).count(), 0);
    }

    #[test]
    fn test_chunk_params_over_limit() {
        let items: Vec<i32> = (0..(MAX_PARAMS_CHUNK as i32 * 2 + 1)).collect();
        let chunks: Vec<_> = chunk_params(&items).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_PARAMS_CHUNK);
        assert_eq!(chunks[2].len(), 1);
    }
}
