use std::fmt::Debug;

use log::{debug, info};

use crate::core::item::{ItemWriter, ItemWriterResult};

/// Logs every item at `info` level, one line per item.
#[derive(Debug, Default)]
pub struct LoggerWriter {
    label: Option<String>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix of each line, `Record` by default.
    pub fn with_label(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
        }
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let label = self.label.as_deref().unwrap_or("Record");
        items.iter().for_each(|item| info!("{}: {:?}", label, item));
        debug!("Logged a chunk of {} items", items.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_never_fail() {
        let writer = LoggerWriter::with_label("Person");
        assert!(ItemWriter::<&str>::write(&writer, &["Ada", "Grace"]).is_ok());
        assert!(ItemWriter::<u8>::write(&LoggerWriter::new(), &[]).is_ok());
    }
}
