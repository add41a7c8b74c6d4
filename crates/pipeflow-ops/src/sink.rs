//! Sink boundary for collaborator writers.

use pipeflow_core::Result;

pub trait Sink<T> {
    fn write(&mut self, item: T) -> Result<()>;

    /// Write a finite batch and finish. Returns how many items were written.
    fn write_all<I>(&mut self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        Self: Sized,
    {
        let mut written = 0;
        for item in items {
            self.write(item)?;
            written += 1;
        }
        self.finish()?;
        Ok(written)
    }

    /// Called once after the last item, also when there were none.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink, mostly for tests and small results.
#[derive(Debug, Default)]
pub struct CollectSink<T> {
    pub items: Vec<T>,
    pub finished: bool,
}

impl<T> CollectSink<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            finished: false,
        }
    }
}

impl<T> Sink<T> for CollectSink<T> {
    fn write(&mut self, item: T) -> Result<()> {
        self.items.push(item);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_all_finishes_even_when_empty() {
        let mut sink = CollectSink::<u8>::new();
        assert_eq!(sink.write_all(Vec::new()).unwrap(), 0);
        assert!(sink.finished);

        let mut sink = CollectSink::new();
        assert_eq!(sink.write_all(vec!["a", "b"]).unwrap(), 2);
        assert_eq!(sink.items, vec!["a", "b"]);
    }
}
