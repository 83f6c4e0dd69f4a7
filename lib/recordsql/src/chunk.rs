//! Chunked iteration over large result sets.

use crate::{Record, RowBinder, Rows, StorageError, Value};

/// A query whose results are delivered in batches of `chunk_size` records.
///
/// `for_each_chunk` receives each full batch and, once the rows run out, the
/// remaining partial batch if it is not empty. Returning
/// [`StorageError::AbortIteration`] stops the iteration without an error.
///
/// ```text
/// db.query_chunks(ChunkParser::new("FROM users", 100, async |users: &[User]| {
///     for user in users {
///         send(user).await?;
///     }
///     Ok(())
/// }))
/// .await?;
/// ```
pub struct ChunkParser<'q, F> {
    pub query: &'q str,
    pub params: Vec<Value>,
    pub chunk_size: usize,
    pub for_each_chunk: F,
}

impl<'q, F> ChunkParser<'q, F> {
    pub fn new<T>(query: &'q str, chunk_size: usize, for_each_chunk: F) -> Self
    where
        T: Record,
        F: AsyncFnMut(&[T]) -> Result<(), StorageError>,
    {
        Self {
            query,
            params: Vec::new(),
            chunk_size,
            for_each_chunk,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Drain `rows` through `for_each_chunk`, closing the cursor afterwards.
pub(crate) async fn deliver<T, F>(
    mut rows: Box<dyn Rows>,
    binder: RowBinder,
    chunk_size: usize,
    for_each_chunk: F,
) -> Result<(), StorageError>
where
    T: Record,
    F: AsyncFnMut(&[T]) -> Result<(), StorageError>,
{
    let result = drain(rows.as_mut(), &binder, chunk_size, for_each_chunk).await;
    let closed = rows.close().await;
    match result {
        Err(StorageError::AbortIteration) => closed,
        Err(e) => Err(e),
        Ok(()) => closed,
    }
}

async fn drain<T, F>(
    rows: &mut dyn Rows,
    binder: &RowBinder,
    chunk_size: usize,
    mut for_each_chunk: F,
) -> Result<(), StorageError>
where
    T: Record,
    F: AsyncFnMut(&[T]) -> Result<(), StorageError>,
{
    // Slots are reused across batches; attributes without a bound column are
    // never written, so they keep the default they were created with.
    let mut batch: Vec<T> = Vec::with_capacity(chunk_size);
    let mut filled = 0usize;
    let mut delivered = 0usize;

    while let Some(row) = rows.next().await? {
        if filled == batch.len() {
            batch.push(T::default());
        }
        binder.scan(row, &mut batch[filled])?;
        filled += 1;

        if filled == chunk_size {
            delivered += 1;
            tracing::trace!(batch = delivered, size = filled, "delivering chunk");
            for_each_chunk(&batch[..filled]).await?;
            filled = 0;
        }
    }

    if filled > 0 {
        tracing::trace!(batch = delivered + 1, size = filled, "delivering final chunk");
        for_each_chunk(&batch[..filled]).await?;
    }
    Ok(())
}
