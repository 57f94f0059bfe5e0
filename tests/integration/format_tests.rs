/*!
 * Format registry lifecycle and on-disk round-trips
 */

use std::io::Write;
use std::path::Path;

use subtrans::model::Subtitles;

use crate::common::SAMPLE_SRT;

#[test]
fn test_load_subtitles_fromSrtFile_shouldPopulateTree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.srt");
    std::fs::write(&path, SAMPLE_SRT).unwrap();

    let mut subtitles = Subtitles::new();
    subtitles.load_subtitles(&path).unwrap();

    assert_eq!(subtitles.linecount(), 4);
    assert_eq!(subtitles.file_format.as_deref(), Some(".srt"));
    assert_eq!(subtitles.sourcepath.as_deref(), Some(path.as_path()));
}

#[test]
fn test_load_subtitles_withWrongExtension_shouldSniffContent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mislabeled.txt");
    std::fs::write(&path, "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHello\n").unwrap();

    let mut subtitles = Subtitles::new();
    subtitles.load_subtitles(&path).unwrap();

    assert_eq!(subtitles.linecount(), 1);
    assert_eq!(subtitles.file_format.as_deref(), Some(".vtt"));
}

#[test]
fn test_load_subtitles_withLatin1Encoding_shouldFallBack() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latin1.srt");

    // "café" encoded as ISO-8859-1; invalid UTF-8
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"1\n00:00:01,000 --> 00:00:02,000\ncaf\xe9\n")
        .unwrap();
    drop(file);

    let mut subtitles = Subtitles::new();
    subtitles.load_subtitles(&path).unwrap();
    assert_eq!(subtitles.originals()[0].text, "caf\u{e9}");
}

#[test]
fn test_save_translation_shouldComposeWithWorkingFormat() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sample.srt");
    std::fs::write(&source, SAMPLE_SRT).unwrap();

    let mut subtitles = Subtitles::new();
    subtitles.load_subtitles(&source).unwrap();

    // Batch everything into one scene and translate it by hand
    let batcher = subtrans::editing::SubtitleBatcher::from_settings(
        &subtrans::settings::Settings::from_pairs([
            ("scene_threshold", subtrans::settings::SettingValue::from(600_usize)),
            ("min_batch_size", subtrans::settings::SettingValue::from(1_usize)),
            ("max_batch_size", subtrans::settings::SettingValue::from(10_usize)),
        ]),
    );
    subtitles.scenes = batcher.batch_subtitles(std::mem::take(&mut subtitles.lines));
    for scene in &mut subtitles.scenes {
        for batch in &mut scene.batches {
            let numbers: Vec<u32> = batch.originals.iter().map(|line| line.number).collect();
            for number in numbers {
                batch.set_line_translation(number, &format!("Translated {number}"));
            }
        }
    }

    let output = dir.path().join("sample.fr.srt");
    subtitles.save_translation(&output).unwrap();

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("Translated 1"));
    assert!(written.contains("00:00:01,000 --> 00:00:02,000"));
    assert!(Path::new(&output).exists());
}
