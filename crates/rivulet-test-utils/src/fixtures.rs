//! Manifest builders.

use rivulet_manifest::{
    Adaptation, InitSegment, Manifest, Period, Representation, Segment, SegmentIndex,
    TemplateIndex, TimelineIndex, TrackType,
};
use url::Url;

/// Video ladder used by most tests, in bits per second.
pub const LADDER: [u64; 3] = [100_000, 500_000, 1_000_000];

pub fn base_url() -> Url {
    Url::parse("http://cdn.test/").expect("base url")
}

pub fn url(path: &str) -> Url {
    base_url().join(path).expect("joined url")
}

/// Representation `id` whose segments live at `{track}/{id}/{n}.m4s`, with an init segment at
/// `{track}/{id}/init.mp4`.
pub fn template_representation(
    track: TrackType,
    id: &str,
    bitrate: u64,
    segment_duration: f64,
    start: f64,
    end: Option<f64>,
) -> Representation {
    let template = TemplateIndex::new(
        base_url(),
        format!("{track}/{id}/$Number$.m4s"),
        1,
        segment_duration,
        start,
        end,
    )
    .expect("template")
    .with_init(InitSegment {
        url: url(&format!("{track}/{id}/init.mp4")),
        byte_range: None,
    });
    Representation::new(id, bitrate, SegmentIndex::Template(template))
}

/// Representation with explicit `(start, duration)` segments at `{track}/{id}/t{start}.m4s`.
pub fn timeline_representation(
    track: TrackType,
    id: &str,
    bitrate: u64,
    segments: &[(f64, f64)],
) -> Representation {
    let segments = segments
        .iter()
        .zip(1..)
        .map(|((start, duration), number)| Segment {
            number,
            start: *start,
            duration: *duration,
            url: url(&format!("{track}/{id}/t{start}.m4s")),
            byte_range: None,
        })
        .collect();
    let init = InitSegment {
        url: url(&format!("{track}/{id}/init.mp4")),
        byte_range: None,
    };
    Representation::new(id, bitrate, SegmentIndex::Timeline(TimelineIndex::new(Some(init), segments)))
}

/// Video adaptation over [`LADDER`], named `v{kbps}k`.
pub fn video_ladder(segment_duration: f64, start: f64, end: Option<f64>) -> Adaptation {
    let representations = LADDER
        .iter()
        .map(|bitrate| {
            let id = format!("v{}k", bitrate / 1000);
            template_representation(TrackType::Video, &id, *bitrate, segment_duration, start, end)
                .with_resolution(
                    u32::try_from(bitrate / 1000).expect("small") * 2,
                    u32::try_from(bitrate / 1000).expect("small"),
                )
        })
        .collect();
    Adaptation::new("video", TrackType::Video, representations).expect("video adaptation")
}

pub fn audio_adaptation(segment_duration: f64, start: f64, end: Option<f64>) -> Adaptation {
    let representation =
        template_representation(TrackType::Audio, "a128k", 128_000, segment_duration, start, end);
    Adaptation::new("audio", TrackType::Audio, vec![representation]).expect("audio adaptation")
}

/// Single-period VOD with a video ladder and one audio track.
pub fn vod_manifest(duration: f64, segment_duration: f64) -> Manifest {
    let period = Period::new(
        "p0",
        0.0,
        vec![
            video_ladder(segment_duration, 0.0, Some(duration)),
            audio_adaptation(segment_duration, 0.0, Some(duration)),
        ],
    )
    .with_end(duration);
    Manifest::new("vod", vec![period], Some(duration)).expect("manifest")
}

/// Single-period VOD carrying only `adaptation`.
pub fn single_track_manifest(adaptation: Adaptation, duration: f64) -> Manifest {
    let period = Period::new("p0", 0.0, vec![adaptation]).with_end(duration);
    Manifest::new("single", vec![period], Some(duration)).expect("manifest")
}
