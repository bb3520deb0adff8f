//! Tag, audio property, and artwork I/O via lofty.

use crate::{Error, Result};
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

/// The textual tags carried from input to output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTags {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
}

/// Stream properties reported by the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioProperties {
    pub duration_secs: f64,
    /// Kilobits per second.
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

/// Embedded or downloaded artwork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    /// File extension matching the image format, e.g. `jpg`.
    pub extension: &'static str,
}

impl CoverArt {
    /// Wrap raw image bytes, sniffing the format from magic bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let extension = sniff_image_extension(&data);
        Self { data, extension }
    }
}

/// Everything read from an input file.
#[derive(Debug, Clone)]
pub struct TagReport {
    pub tags: AudioTags,
    pub properties: AudioProperties,
    pub cover: Option<CoverArt>,
}

/// Read tags, properties and front cover from `path`.
///
/// # Errors
///
/// [`Error::FileNotFound`] if the file is missing and [`Error::Tag`] if the
/// tag library cannot parse it as audio.
pub fn read_tags(path: &Path) -> Result<TagReport> {
    if !path.exists() {
        return Err(Error::file_not_found(path));
    }
    let tagged = Probe::open(path)?.guess_file_type()?.read()?;

    let props = tagged.properties();
    let properties = AudioProperties {
        duration_secs: props.duration().as_secs_f64(),
        bitrate_kbps: props.audio_bitrate(),
        sample_rate: props.sample_rate(),
        channels: props.channels(),
    };

    let (tags, cover) = match tagged.primary_tag().or_else(|| tagged.first_tag()) {
        Some(tag) => (tags_from(tag), front_cover(tag)),
        None => (AudioTags::default(), None),
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        file = %path.display(),
        artist = ?tags.artist,
        title = ?tags.title,
        duration_s = properties.duration_secs,
        has_cover = cover.is_some(),
        "Read audio tags"
    );

    Ok(TagReport {
        tags,
        properties,
        cover,
    })
}

fn text(v: Option<Cow<'_, str>>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn tags_from(tag: &Tag) -> AudioTags {
    AudioTags {
        artist: text(tag.artist()),
        album: text(tag.album()),
        title: text(tag.title()),
        track_number: tag.track(),
        year: tag.year(),
    }
}

fn front_cover(tag: &Tag) -> Option<CoverArt> {
    let pictures = tag.pictures();
    pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
        .map(|p| CoverArt {
            data: p.data().to_vec(),
            extension: p
                .mime_type()
                .and_then(mime_extension)
                .unwrap_or_else(|| sniff_image_extension(p.data())),
        })
}

fn mime_extension(mime: &MimeType) -> Option<&'static str> {
    match mime {
        MimeType::Jpeg => Some("jpg"),
        MimeType::Png => Some("png"),
        MimeType::Gif => Some("gif"),
        MimeType::Bmp => Some("bmp"),
        MimeType::Tiff => Some("tiff"),
        _ => None,
    }
}

/// Guess an image extension from magic bytes, defaulting to `jpg`.
pub fn sniff_image_extension(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if data.starts_with(b"GIF8") {
        "gif"
    } else if data.starts_with(b"BM") {
        "bmp"
    } else {
        "jpg"
    }
}

/// Write `tags` and an optional front cover into the file at `path`.
///
/// Existing values for the written fields are replaced; `None` fields are
/// left untouched.
pub fn write_tags(path: &Path, tags: &AudioTags, cover: Option<&[u8]>) -> Result<()> {
    let mut tagged = Probe::open(path)?.guess_file_type()?.read()?;
    let tag_type = tagged.primary_tag_type();
    if tagged.tag(tag_type).is_none() {
        tagged.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged
        .tag_mut(tag_type)
        .ok_or_else(|| Error::Tag(format!("cannot create {:?} tag", tag_type)))?;

    if let Some(ref artist) = tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(ref album) = tags.album {
        tag.set_album(album.clone());
    }
    if let Some(ref title) = tags.title {
        tag.set_title(title.clone());
    }
    if let Some(track) = tags.track_number {
        tag.set_track(track);
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }
    if let Some(data) = cover {
        let mut picture = Picture::from_reader(&mut &data[..])?;
        picture.set_pic_type(PictureType::CoverFront);
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(picture);
    }

    tagged.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_wav(path: &Path) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..44100 {
            let s = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    // Smallest valid PNG: 1x1 transparent pixel
    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn test_write_then_read_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_wav(&path);

        let tags = AudioTags {
            artist: Some("A".into()),
            album: Some("B".into()),
            title: Some("C".into()),
            track_number: Some(7),
            year: Some(2024),
        };
        write_tags(&path, &tags, Some(PNG)).unwrap();

        let report = read_tags(&path).unwrap();
        assert_eq!(report.tags, tags);
        assert!((report.properties.duration_secs - 1.0).abs() < 0.05);
        assert_eq!(report.properties.channels, Some(2));
        let cover = report.cover.unwrap();
        assert_eq!(cover.extension, "png");
        assert_eq!(cover.data, PNG);
    }

    #[test]
    fn test_untagged_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.wav");
        write_wav(&path);

        let report = read_tags(&path).unwrap();
        assert_eq!(report.tags, AudioTags::default());
        assert!(report.cover.is_none());
    }

    #[test]
    fn test_malformed_audio_is_tag_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        assert!(matches!(read_tags(&path), Err(Error::Tag(_))));
        assert!(matches!(
            read_tags(&dir.path().join("missing.mp3")),
            Err(Error::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_sniff_extension() {
        assert_eq!(sniff_image_extension(PNG), "png");
        assert_eq!(sniff_image_extension(&[0xFF, 0xD8, 0xFF]), "jpg");
        assert_eq!(CoverArt::from_bytes(b"GIF89a".to_vec()).extension, "gif");
    }
}
