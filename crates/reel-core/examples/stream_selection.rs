//! Stream selection example
//!
//! Ranks one playlist's streams for a few runtimes and shows the source the
//! video engine would receive for the winner.
//!
//! Run with: cargo run -p reel-core --example stream_selection

use reel_core::types::key_systems;
use reel_core::{
    detect_capabilities, DrmType, PlaybackSource, StaticProbe, Stream, StreamProtocol, StreamSelector,
};

#[tokio::main]
async fn main() {
    println!("Reel Core - Stream Selection Example");
    println!("====================================\n");

    let streams = vec![
        Stream::plain(StreamProtocol::Hls, "https://cdn.example.com/movie/plain.m3u8"),
        Stream::protected(
            StreamProtocol::Dash,
            DrmType::Widevine,
            "https://cdn.example.com/movie/wv.mpd",
            "https://ls.example.com/widevine",
        ),
        Stream::protected(
            StreamProtocol::Hls,
            DrmType::FairPlay,
            "https://cdn.example.com/movie/fps.m3u8",
            "https://ls.example.com/fairplay",
        ),
        Stream::protected(
            StreamProtocol::Dash,
            DrmType::PlayReady,
            "https://cdn.example.com/movie/pr.mpd",
            "https://ls.example.com/playready",
        ),
    ];

    let mse = StaticProbe {
        media_source: true,
        ..Default::default()
    };
    let runtimes = [
        ("Chrome", mse.clone().with_key_system(key_systems::WIDEVINE)),
        ("Edge", mse.clone().with_key_system(key_systems::PLAYREADY)),
        (
            "Safari",
            StaticProbe { hls: true, ..mse.clone() }.with_key_system(key_systems::FAIRPLAY_2_0),
        ),
        ("No DRM", mse),
    ];

    let http = reqwest::Client::new();
    for (name, probe) in runtimes {
        let capabilities = detect_capabilities(&probe).await;
        println!("{}: {}", name, capabilities.iter().collect::<Vec<_>>().join(", "));

        let mut selector = StreamSelector::new(&streams, &capabilities, &[]);
        let Some(best) = selector.next() else {
            println!("  no playable stream\n");
            continue;
        };
        println!("  fallbacks: {}", selector.pending_keys().map(|k| k.to_string()).collect::<Vec<_>>().join(" -> "));

        let source = PlaybackSource::from_stream(&best, &http);
        match serde_json::to_string_pretty(&source) {
            Ok(json) => println!("  source: {}\n", json.replace('\n', "\n  ")),
            Err(e) => println!("  source could not be serialized: {}\n", e),
        }
    }
}
