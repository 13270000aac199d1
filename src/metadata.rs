use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::file::FileType;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::read_from_path;
use lofty::tag::ItemKey;
use lofty::tag::{Tag, TagType};
use std::path::Path;

/// Best-effort metadata pulled out of a file's embedded tags.
/// Every field is optional; the reconciler decides what wins.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub cover: Option<EmbeddedCover>,
}

/// Front-cover picture bytes as found in the tags.
#[derive(Debug, Clone)]
pub struct EmbeddedCover {
    pub data: Vec<u8>,
    pub mime: Option<String>,
}

impl EmbeddedCover {
    /// File extension to use when saving this picture into the covers
    /// subdirectory.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_deref() {
            Some("image/png") => "png",
            _ => "jpg",
        }
    }
}

/// The tag-reading capability the reconciler depends on. The engine only
/// cares about "give me whatever the file's tags say"; failures are the
/// caller's to downgrade.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<EmbeddedTags>;
}

/// Production reader backed by lofty.
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read(&self, path: &Path) -> Result<EmbeddedTags> {
        read_embedded(path)
    }
}

/// Reads embedded tags from a file path.
pub fn read_embedded(path: &Path) -> Result<EmbeddedTags> {
    let tagged_file = read_from_path(path).context("Failed to read file")?;
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let Some(tag) = tag else {
        return Ok(EmbeddedTags::default());
    };

    let cover = tag
        .pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| tag.pictures().first())
        .map(|p| EmbeddedCover {
            data: p.data().to_vec(),
            mime: p.mime_type().map(|m| m.as_str().to_string()),
        });

    Ok(EmbeddedTags {
        title: non_empty(tag.title().map(|s| s.to_string())),
        artist: non_empty(tag.artist().map(|s| s.to_string())),
        album: non_empty(tag.album().map(|s| s.to_string())),
        genre: non_empty(tag.genre().map(|s| s.to_string())),
        cover,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Re-encodes a song's editable fields into the underlying file's embedded
/// tags and overwrites the file in place: title, artist, album-as-folder,
/// genre, BPM, lyrics, and optionally the front cover.
///
/// lofty assembles the full tag before committing the write, so a failure
/// partway through reading or building leaves the original bytes alone.
pub fn write_song_tags(path: &Path, song: &crate::models::Song, cover: Option<&[u8]>) -> Result<()> {
    let mut tagged_file = read_from_path(path).context("Failed to read file for writing")?;

    // 1. Remove ID3v1 to prevent player conflicts
    if tagged_file.tag(TagType::Id3v1).is_some() {
        tagged_file.remove(TagType::Id3v1);
    }

    // 2. Get a workable tag, preferring whatever the file already carries
    let mut tag = match tagged_file.primary_tag() {
        Some(t) => t.clone(),
        None => match tagged_file.first_tag() {
            Some(t) => t.clone(),
            None => Tag::new(tagged_file.primary_tag_type()),
        },
    };

    // Force ID3v2 for MP3/AIFF
    if (tagged_file.file_type() == FileType::Mpeg || tagged_file.file_type() == FileType::Aiff)
        && tag.tag_type() != TagType::Id3v2
    {
        tag = Tag::new(TagType::Id3v2);
    }

    // 3. Editable fields. The folder doubles as the album so other players
    // see the user's grouping.
    tag.set_title(song.title.clone());
    tag.set_artist(song.persona.clone());
    tag.set_album(song.folder.clone());

    if song.meta.genre.trim().is_empty() {
        tag.remove_genre();
    } else {
        tag.set_genre(song.meta.genre.clone());
    }

    set_or_clear(&mut tag, ItemKey::Bpm, &song.meta.bpm);
    set_or_clear(&mut tag, ItemKey::Lyrics, &song.lyrics);

    // 4. Cover replacement, if requested
    if let Some(bytes) = cover {
        let picture = Picture::new_unchecked(
            PictureType::CoverFront,
            Some(sniff_mime(bytes)),
            None,
            bytes.to_vec(),
        );
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(picture);
    }

    // 5. Save
    tag.save_to_path(path, WriteOptions::default())
        .context("Failed to save tags to disk")?;

    Ok(())
}

fn set_or_clear(tag: &mut Tag, key: ItemKey, value: &str) {
    tag.remove_key(&key);
    if !value.trim().is_empty() {
        tag.insert_text(key, value.to_string());
    }
}

fn sniff_mime(bytes: &[u8]) -> MimeType {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        MimeType::Png
    } else {
        MimeType::Jpeg
    }
}
