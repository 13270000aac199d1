use lofty::prelude::*;
use lofty::read_from_path;
use soundvault::metadata::read_embedded;
use std::env;
use std::path::Path;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: inspect_file <audio_file_path>");
        return;
    }

    let path = Path::new(&args[1]);
    println!("Reading file: {}", path.display());

    match read_from_path(path) {
        Ok(tagged_file) => println!("Detected format: {:?}", tagged_file.file_type()),
        Err(e) => {
            println!("Error reading file: {}", e);
            return;
        }
    }

    // What the reconciler would see for this file.
    match read_embedded(path) {
        Ok(tags) => {
            println!("Title:  {}", tags.title.as_deref().unwrap_or("(none)"));
            println!("Artist: {}", tags.artist.as_deref().unwrap_or("(none)"));
            println!("Album:  {}", tags.album.as_deref().unwrap_or("(none)"));
            println!("Genre:  {}", tags.genre.as_deref().unwrap_or("(none)"));
            match tags.cover {
                Some(cover) => println!(
                    "Cover:  {} bytes ({})",
                    cover.data.len(),
                    cover.mime.as_deref().unwrap_or("unknown mime")
                ),
                None => println!("Cover:  (none)"),
            }
        }
        Err(e) => println!("Error reading tags: {}", e),
    }
}
