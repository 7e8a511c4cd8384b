//! Integration tests for the stream session controller
//!
//! The controller runs against the in-memory clients of the test harness,
//! so every test drives the real peer manager, recorder and failover
//! monitor without touching the network.

mod harness;

use harness::{wait_for_event, CallLog, FakeClientFactory, FakeDocuments, FakePeerFactory, FakeSpeech, FakeUploader};
use lecture_stream::clock::ManualClock;
use lecture_stream::context::ScreenSource;
use lecture_stream::error::{ClientFault, MediaType};
use lecture_stream::signaling::{SessionDescription, SignalingListener};
use lecture_stream::{
    ConfigChange, Contact, Course, Document, DocumentKind, Error, EventRecorder, Executable,
    ExecutableState, PlaybackAction, SessionEvent, StreamConfig, StreamSessionController,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    controller: StreamSessionController,
    log: CallLog,
    clients: Arc<FakeClientFactory>,
    speech: Arc<FakeSpeech>,
}

fn course() -> Course {
    Course::new("C1", "Physics")
}

fn fixture(config: StreamConfig) -> Fixture {
    let log = CallLog::default();
    let clients = FakeClientFactory::new(log.clone());
    let peers = FakePeerFactory::new(log.clone());
    let speech = Arc::new(FakeSpeech { log: log.clone() });

    let documents = FakeDocuments::new(vec![Document::new("Slides", DocumentKind::Pdf, 12)]);
    let recorder = EventRecorder::with_time_source(documents, Arc::new(ManualClock::new(0)));

    let controller = StreamSessionController::with_recorder(config, recorder)
        .with_client_factory(clients.clone())
        .with_peer_factory(peers)
        .with_speech_service(speech.clone())
        .with_uploader(Arc::new(FakeUploader::default()));

    Fixture {
        controller,
        log,
        clients,
        speech,
    }
}

async fn started(config: StreamConfig) -> Fixture {
    let mut fixture = fixture(config);
    fixture.controller.set_course(Some(course()));
    fixture.controller.start().await.unwrap();
    fixture
}

#[tokio::test]
async fn test_start_requires_course() {
    let mut fixture = fixture(StreamConfig::default());

    let err = fixture.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::MissingCourse));
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Created);
    assert_eq!(fixture.clients.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_start_connects_clients_and_records() {
    let fixture = started(StreamConfig::default()).await;
    let log = &fixture.log;

    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Created);

    let state = log.position("state:connect").unwrap();
    let media = log.position("media:connect:C1").unwrap();
    assert!(state < media);
    assert!(log.contains("peer:1001:create"));
    assert!(log.contains("peer:1001:offer:video=false"));
    assert!(fixture.speech.log.contains("speech:recording:C1:true"));

    let actions = fixture.clients.state.sink.actions();
    assert_eq!(
        actions.first(),
        Some(&PlaybackAction::Init {
            course_id: "C1".to_string()
        })
    );
    assert_eq!(
        actions.last(),
        Some(&PlaybackAction::Start {
            course_id: "C1".to_string()
        })
    );

    let recorder = fixture.controller.recorder();
    assert_eq!(recorder.lock().await.state(), ExecutableState::Started);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let mut fixture = started(StreamConfig::default()).await;

    fixture.controller.start().await.unwrap();

    assert_eq!(fixture.clients.creates.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
}

#[tokio::test]
async fn test_handler_fault_demotes_stream() {
    let mut fixture = started(StreamConfig::default()).await;
    let mut events = fixture.controller.events();

    fixture
        .clients
        .faults()
        .send(ClientFault::handler("Janus session timed out"))
        .unwrap();

    wait_for_event(&mut events, |e| {
        *e == SessionEvent::StreamState(ExecutableState::Error)
    })
    .await;
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Error);

    fixture.controller.stop().await.unwrap();
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Stopped);

    let log = &fixture.log;
    let close = log.position("peer:1001:close").unwrap();
    let disconnect = log.position("media:disconnect").unwrap();
    assert!(close < disconnect);
    assert!(log.contains("media:leave"));
    assert!(log.contains("state:disconnect"));
    assert!(fixture.speech.log.contains("speech:recording:C1:false"));
}

#[tokio::test]
async fn test_stray_answer_keeps_stream_started() {
    let fixture = started(StreamConfig::default()).await;
    let peers = fixture.controller.peers().unwrap();

    peers.on_remote_session_description(Contact::new("999", "Gone"), SessionDescription::answer("v=0"));

    // Queued behind the answer.
    assert_eq!(peers.contacts().await.unwrap().len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Created);
}

#[tokio::test]
async fn test_media_fault_is_published() {
    let fixture = started(StreamConfig::default()).await;
    let mut events = fixture.controller.events();

    fixture
        .clients
        .faults()
        .send(ClientFault::media(MediaType::Video, "Camera is busy"))
        .unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, SessionEvent::MediaError { .. })).await;
    assert_eq!(
        event,
        SessionEvent::MediaError {
            media_type: MediaType::Video,
            message: "Camera is busy".to_string()
        }
    );
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
}

#[tokio::test]
async fn test_camera_requires_started_stream() {
    let mut fixture = fixture(StreamConfig::default());

    assert!(fixture.controller.start_camera_stream().await.is_err());
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Created);

    fixture.controller.set_course(Some(course()));
    fixture.controller.start().await.unwrap();
    fixture.controller.start_camera_stream().await.unwrap();

    assert_eq!(fixture.controller.camera_state(), ExecutableState::Started);
    assert!(fixture.log.contains("peer:1001:offer:video=true"));
    let context = fixture.controller.context().unwrap();
    assert!(context.read().video.send_video);

    fixture.controller.stop_camera_stream().await.unwrap();
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Stopped);
    assert!(!context.read().video.send_video);
}

#[tokio::test]
async fn test_stop_resets_nested_facets() {
    let config = StreamConfig {
        camera_enabled: true,
        ..Default::default()
    };
    let mut fixture = fixture(config);
    fixture.controller.set_course(Some(course()));
    fixture.controller.set_screen_source(Some(ScreenSource {
        id: 1,
        title: "Display 1".to_string(),
        is_screen: true,
    }));

    fixture.controller.start().await.unwrap();
    fixture.controller.start_screen_share().await.unwrap();
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Started);
    assert_eq!(fixture.controller.screen_share_state(), ExecutableState::Started);

    let mut events = fixture.controller.events();
    fixture.controller.stop().await.unwrap();

    assert_eq!(fixture.controller.stream_state(), ExecutableState::Stopped);
    assert_eq!(fixture.controller.camera_state(), ExecutableState::Stopped);
    assert_eq!(fixture.controller.screen_share_state(), ExecutableState::Stopped);
    assert!(fixture.controller.context().is_none());

    wait_for_event(&mut events, |e| {
        *e == SessionEvent::CameraState(ExecutableState::Stopped)
    })
    .await;
}

#[tokio::test]
async fn test_failed_start_is_cleaned_up() {
    let mut fixture = fixture(StreamConfig::default());
    fixture.controller.set_course(Some(course()));
    fixture.clients.media.fail_connect.store(true, Ordering::SeqCst);

    let err = fixture.controller.start().await.unwrap_err();

    assert!(matches!(err, Error::Signaling(_)));
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Error);
    assert!(fixture.log.contains("state:disconnect"));
    assert!(fixture.controller.context().is_none());

    fixture.controller.stop().await.unwrap();
    fixture.clients.media.fail_connect.store(false, Ordering::SeqCst);
    fixture.controller.start().await.unwrap();

    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
    assert_eq!(fixture.clients.creates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let mut fixture = started(StreamConfig::default()).await;

    fixture.controller.suspend().await.unwrap();
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Suspended);
    assert_eq!(
        fixture.controller.recorder().lock().await.state(),
        ExecutableState::Suspended
    );

    fixture.controller.start().await.unwrap();
    assert_eq!(fixture.controller.stream_state(), ExecutableState::Started);
    assert_eq!(
        fixture.controller.recorder().lock().await.state(),
        ExecutableState::Started
    );
    assert_eq!(fixture.clients.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_speech_requests_only_while_started() {
    let mut fixture = fixture(StreamConfig::default());
    let request = Uuid::new_v4();

    fixture
        .controller
        .accept_speech_request(request, "Ada")
        .await
        .unwrap();
    assert!(fixture.log.calls().is_empty());

    fixture.controller.set_course(Some(course()));
    fixture.controller.start().await.unwrap();

    fixture
        .controller
        .accept_speech_request(request, "Ada")
        .await
        .unwrap();
    fixture.controller.stop_peer_connection(7).await.unwrap();
    fixture
        .controller
        .reject_speech_request(Uuid::nil())
        .await
        .unwrap();

    let log = &fixture.log;
    let start = log
        .position(&format!("media:speech:start:{}:Ada", request))
        .unwrap();
    let accept = log.position(&format!("speech:accept:{}", request)).unwrap();
    assert!(start < accept);
    assert!(log.contains("media:speech:stop:7"));
    assert!(log.contains(&format!("speech:reject:{}", Uuid::nil())));
}

#[tokio::test]
async fn test_screen_share_requires_source() {
    let mut fixture = started(StreamConfig::default()).await;

    let err = fixture.controller.start_screen_share().await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(fixture.controller.screen_share_state(), ExecutableState::Created);

    fixture.controller.set_screen_source(Some(ScreenSource {
        id: 7,
        title: "Slides window".to_string(),
        is_screen: false,
    }));
    fixture.controller.start_screen_share().await.unwrap();
    let context = fixture.controller.context().unwrap();
    assert!(context.read().screen.send_screen);

    fixture.controller.on_screen_source_ended();
    assert_eq!(fixture.controller.screen_share_state(), ExecutableState::Stopped);
    assert!(!context.read().screen.send_screen);
}

#[tokio::test]
async fn test_screen_source_ended_callback_stops_share() {
    let mut fixture = started(StreamConfig::default()).await;
    fixture.controller.set_screen_source(Some(ScreenSource {
        id: 2,
        title: "Display 2".to_string(),
        is_screen: true,
    }));
    fixture.controller.start_screen_share().await.unwrap();

    let mut events = fixture.controller.events();
    let context = fixture.controller.context().unwrap();
    let source_ended = context.read().screen.source_ended.clone().unwrap();
    source_ended();

    wait_for_event(&mut events, |e| {
        *e == SessionEvent::ScreenShareState(ExecutableState::Stopped)
    })
    .await;
    assert!(!context.read().screen.send_screen);
}

#[tokio::test]
async fn test_config_change_reaches_context() {
    let fixture = started(StreamConfig::default()).await;
    let context = fixture.controller.context().unwrap();

    fixture
        .controller
        .config_changes()
        .send(ConfigChange::PlaybackVolume(0.5))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while context.read().audio.playback_volume != 0.5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(fixture.controller.config().audio.playback_volume, 0.5);
}

#[tokio::test]
async fn test_mute_peer_media() {
    let fixture = started(StreamConfig::default()).await;
    let context = fixture.controller.context().unwrap();

    fixture.controller.mute_peer_audio(true);
    fixture.controller.mute_peer_video(true);
    fixture.controller.set_microphone_enabled(false);

    let context = context.read();
    assert!(!context.audio.receive_audio);
    assert!(!context.video.receive_video);
    assert!(!context.audio.send_audio);
}
