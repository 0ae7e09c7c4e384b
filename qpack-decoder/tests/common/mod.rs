//! Recording handlers shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use bytes::Bytes;
use qpack_decoder::{
    DecoderConfig, DecodingErrorKind, EncoderStreamErrorDelegate, EncoderStreamErrorKind,
    HeadersHandler, QpackDecoder,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a test-writer subscriber once per test binary, filtered by
/// `RUST_LOG` (default: warnings only).
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("warn"))
            .unwrap();
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_line_number(true);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    });
}

/// Callback observed on some stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Header(u64, String, String),
    Completed(u64),
    Error(u64, DecodingErrorKind),
    EncoderStreamError(EncoderStreamErrorKind),
}

/// Connection-wide event log, in callback order.
pub type Log = Rc<RefCell<Vec<Event>>>;

struct Recorder {
    stream_id: u64,
    log: Log,
}

impl HeadersHandler for Recorder {
    fn on_header_decoded(&mut self, name: Bytes, value: Bytes) {
        self.log.borrow_mut().push(Event::Header(
            self.stream_id,
            String::from_utf8_lossy(&name).into_owned(),
            String::from_utf8_lossy(&value).into_owned(),
        ));
    }

    fn on_decoding_completed(&mut self) {
        self.log.borrow_mut().push(Event::Completed(self.stream_id));
    }

    fn on_decoding_error_detected(&mut self, kind: DecodingErrorKind, detail: &str) {
        assert_eq!(detail, kind.detail());
        self.log.borrow_mut().push(Event::Error(self.stream_id, kind));
    }
}

struct Delegate(Log);

impl EncoderStreamErrorDelegate for Delegate {
    fn on_encoder_stream_error(&mut self, kind: EncoderStreamErrorKind, detail: &str) {
        assert_eq!(detail, kind.detail());
        self.0.borrow_mut().push(Event::EncoderStreamError(kind));
    }
}

/// A decoder whose every callback lands in one log.
pub struct Harness {
    pub decoder: QpackDecoder,
    pub log: Log,
}

impl Harness {
    pub fn new(config: DecoderConfig) -> Self {
        init_logging();
        let log = Log::default();
        let decoder = QpackDecoder::new(config, Box::new(Delegate(log.clone())));
        Self { decoder, log }
    }

    pub fn begin(&mut self, stream_id: u64) {
        let recorder = Recorder {
            stream_id,
            log: self.log.clone(),
        };
        self.decoder.begin_header_block(stream_id, Box::new(recorder));
    }

    /// Begins, feeds and ends a block in one go.
    pub fn block(&mut self, stream_id: u64, data: &[u8]) {
        self.begin(stream_id);
        self.decoder.decode_header_block(stream_id, data);
        self.decoder.end_header_block(stream_id);
    }

    pub fn encoder_stream(&mut self, data: &[u8]) {
        self.decoder.decode_encoder_stream(data);
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

pub fn header(stream_id: u64, name: &str, value: &str) -> Event {
    Event::Header(stream_id, name.to_owned(), value.to_owned())
}
