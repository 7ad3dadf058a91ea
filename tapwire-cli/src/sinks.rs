//! JSON-lines writers for entries and outbound links.

use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use tapwire_core::{Entry, EntrySink, LinkSink, OutboundLink};
use tracing::warn;

pub type Output = Box<dyn Write + Send>;

/// Stdout when no path is given, otherwise a line-buffered file.
pub fn open_output(path: Option<&Path>) -> io::Result<Output> {
    match path {
        Some(path) => Ok(Box::new(LineWriter::new(File::create(path)?))),
        None => Ok(Box::new(io::stdout())),
    }
}

struct JsonLines<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLines<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn write<T: Serialize>(&self, value: &T) {
        let mut writer = self.writer.lock();
        let result = serde_json::to_writer(&mut *writer, value)
            .map_err(io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = result {
            warn!(error = %e, "failed to write record");
        }
    }

    fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

pub struct JsonLinesEntrySink<W> {
    out: JsonLines<W>,
    summary_only: bool,
}

impl<W: Write> JsonLinesEntrySink<W> {
    pub fn new(writer: W, summary_only: bool) -> Self {
        Self {
            out: JsonLines::new(writer),
            summary_only,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> EntrySink for JsonLinesEntrySink<W> {
    fn accept(&self, entry: Entry) {
        if self.summary_only {
            self.out.write(&entry.summary());
        } else {
            self.out.write(&entry);
        }
    }
}

pub struct JsonLinesLinkSink<W> {
    out: JsonLines<W>,
}

impl<W: Write> JsonLinesLinkSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: JsonLines::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> LinkSink for JsonLinesLinkSink<W> {
    fn accept(&self, link: OutboundLink) {
        self.out.write(&link);
    }
}
