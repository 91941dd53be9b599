use base64::Engine;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::watch;
use ttspreview_core::{
    channel::mock::{success_reply, MockChannel},
    media::mock::MockSink,
    preview::{FormData, PreviewRequest, PreviewSession, RequestBuilder, SessionConfig, SessionState},
};

pub struct Fixture {
    pub session: PreviewSession,
    #[allow(dead_code)]
    pub channel: MockChannel,
    #[allow(dead_code)]
    pub sink: MockSink,
    #[allow(dead_code)]
    state_rx: watch::Receiver<SessionState>,
}

impl Fixture {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    #[allow(dead_code)]
    pub fn with_config(config: SessionConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let channel = MockChannel::new();
        let sink = MockSink::new();
        let session = PreviewSession::new(Arc::new(channel.clone()), Arc::new(sink.clone()), config);
        let state_rx = session.subscribe();

        Self {
            session,
            channel,
            sink,
            state_rx,
        }
    }

    /// Wait until the session reaches `state`
    #[allow(dead_code)]
    pub async fn wait_for_state(&mut self, state: SessionState) {
        self.state_rx
            .wait_for(|s| *s == state)
            .await
            .expect("session state channel closed");
    }
}

#[allow(dead_code)]
pub fn form() -> FormData {
    match json!({
        "base_url": "http://kokoro:8880",
        "model": "kokoro",
        "persona": "af_heart",
        "preview_text": "",
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[allow(dead_code)]
pub fn request() -> PreviewRequest {
    RequestBuilder::new().build(&form()).unwrap()
}

/// Base64 of a short 16-bit mono WAV
#[allow(dead_code)]
pub fn wav_base64(sample_rate: u32, frames: usize) -> String {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 64) as i16 * 100).unwrap();
        }
        writer.finalize().unwrap();
    }
    base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
}

#[allow(dead_code)]
pub fn wav_reply() -> Value {
    success_reply(&wav_base64(24000, 240), "audio/wav")
}

pub fn run<F, Fut>(test_fn: F)
where
    F: FnOnce(Fixture) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    run_with_config(SessionConfig::default(), test_fn)
}

pub fn run_with_config<F, Fut>(config: SessionConfig, test_fn: F)
where
    F: FnOnce(Fixture) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    use tokio::time::{timeout, Duration};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    let local = tokio::task::LocalSet::new();

    runtime.block_on(local.run_until(async {
        let fixture = Fixture::with_config(config);
        let test_future = test_fn(fixture);
        timeout(Duration::from_secs(10), test_future)
            .await
            .expect("Test timed out after 10 seconds");
    }));
}
