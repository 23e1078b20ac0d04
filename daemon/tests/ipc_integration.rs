/// Integration tests for IPC communication
/// These tests pin the wire format of commands, responses and library
/// records
use common::{
    Command, ContentSource, LibraryPage, PlaybackStatus, Response, ScaleMode, Settings,
    SettingsPatch, VideoEntry, WallpaperError,
};
use uuid::Uuid;

#[test]
fn test_command_wire_format() {
    let id = Uuid::nil();

    assert_eq!(serde_json::to_string(&Command::Ping).unwrap(), "\"Ping\"");
    assert_eq!(
        serde_json::to_string(&Command::PlayVideo { id }).unwrap(),
        format!("{{\"PlayVideo\":{{\"id\":\"{}\"}}}}", id)
    );
    assert_eq!(
        serde_json::to_string(&Command::ListVideos { page: None }).unwrap(),
        "{\"ListVideos\":{\"page\":null}}"
    );
}

#[test]
fn test_set_content_from_hand_written_json() {
    let json = r#"{"SetContent":{"source":{"YouTube":{"url":"https://youtu.be/abc"}}}}"#;
    match serde_json::from_str::<Command>(json).unwrap() {
        Command::SetContent {
            source: ContentSource::YouTube { url },
        } => assert_eq!(url, "https://youtu.be/abc"),
        other => panic!("Wrong command: {:?}", other),
    }

    let json = r#"{"SetContent":{"source":{"Video":{"path":"/videos/sea.mp4"}}}}"#;
    match serde_json::from_str::<Command>(json).unwrap() {
        Command::SetContent { source } => {
            assert_eq!(source, ContentSource::video("/videos/sea.mp4"))
        }
        other => panic!("Wrong command: {:?}", other),
    }
}

#[test]
fn test_partial_settings_patch() {
    let json = r#"{"UpdateSettings":{"patch":{"scaling":"fit","muted":false}}}"#;
    match serde_json::from_str::<Command>(json).unwrap() {
        Command::UpdateSettings { patch } => {
            assert_eq!(patch.scaling, Some(ScaleMode::Fit));
            assert_eq!(patch.muted, Some(false));
            assert!(patch.quality.is_none());
            assert!(patch.playback_speed.is_none());
            assert!(!patch.is_empty());
        }
        other => panic!("Wrong command: {:?}", other),
    }

    assert!(SettingsPatch::default().is_empty());
}

#[test]
fn test_unknown_command_is_rejected() {
    assert!(serde_json::from_str::<Command>("\"SetShader\"").is_err());
    assert!(serde_json::from_str::<Command>("{\"RemoveVideo\":{\"id\":\"nope\"}}").is_err());
}

#[test]
fn test_error_response() {
    let response = Response::Error(WallpaperError::NotFound("No video with id 1".to_string()));
    let json = serde_json::to_string(&response).unwrap();

    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Error(e) => assert_eq!(e.to_string(), "Not found: No video with id 1"),
        other => panic!("Wrong response: {:?}", other),
    }
}

#[test]
fn test_status_response() {
    let json = r#"{"Status":{
        "version":"0.1.0",
        "uptime_secs":12,
        "playback":{"Playing":{"source":{"Web":{"location":"https://example.com"}},"display":3}},
        "library_size":4,
        "selected":null
    }}"#;

    match serde_json::from_str::<Response>(json).unwrap() {
        Response::Status(status) => {
            assert_eq!(status.library_size, 4);
            assert_eq!(
                status.playback,
                PlaybackStatus::Playing {
                    source: ContentSource::Web {
                        location: "https://example.com".to_string()
                    },
                    display: Some(3),
                }
            );
        }
        other => panic!("Wrong response: {:?}", other),
    }
}

#[test]
fn test_library_record_format() {
    // Records as persisted under `video_library`
    let json = r#"{
        "id":"6f1c2a4e-1b7d-4c55-9a51-2f0f3c1e8d10",
        "url":"/home/me/.local/share/loopwall/Wallpapers/hd_ocean.mp4",
        "thumbnail_url":null,
        "duration":83.5,
        "file_size":1250000000,
        "date_added":"2025-03-01T10:00:00Z",
        "is_favorite":true,
        "file_name":"hd_ocean.mp4"
    }"#;

    let entry: VideoEntry = serde_json::from_str(json).unwrap();
    assert!(entry.is_favorite);
    assert!(entry.thumbnail_path().is_none());
    assert_eq!(entry.formatted_duration(), "1:23");
    assert_eq!(entry.formatted_file_size(), "1.25 GB");

    let page = LibraryPage {
        page: 0,
        total_pages: 1,
        has_next: false,
        has_previous: false,
        entries: vec![entry.clone()],
        selected: Some(entry.id),
    };
    let json = serde_json::to_string(&Response::Page(page)).unwrap();
    match serde_json::from_str::<Response>(&json).unwrap() {
        Response::Page(page) => assert_eq!(page.entries, vec![entry]),
        other => panic!("Wrong response: {:?}", other),
    }
}

#[test]
fn test_settings_response_uses_lowercase_scaling() {
    let json = serde_json::to_string(&Response::Settings(Settings::default())).unwrap();
    assert!(json.contains("\"scaling\":\"fill\""));
    assert!(json.contains("\"muted\":true"));
}
