use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Map, Value};

use crate::errors::SubtitleError;
use crate::model::{SubtitleBatch, SubtitleLine, SubtitleScene, Subtitles};
use crate::settings::Settings;
use crate::timecode::{duration_from_seconds, duration_to_seconds};

const CLASS_MARKER: &str = "_class";

/// Map legacy project-file settings onto their current names.
///
/// Older project files used different keys; they are translated on load
/// so old projects keep working.
pub fn apply_legacy_settings(settings: &mut Settings) {
    if settings.get_str("description").is_none() {
        if let Some(synopsis) = settings.get_str("synopsis") {
            settings.set("description", synopsis);
        }
    }
    settings.remove("synopsis");

    if settings.contains("characters") {
        let mut names = settings.get_str_list("names");
        names.extend(settings.get_str_list("characters"));
        settings.set("names", names);
        settings.remove("characters");
    }

    if let Some(prompt) = settings.remove("gpt_prompt") {
        settings.set("prompt", prompt);
    }

    if let Some(model) = settings.remove("gpt_model") {
        settings.set("model", model);
    }

    if settings.get_str("substitution_mode").is_none() {
        let partial = settings
            .get_bool("match_partial_words")
            .unwrap_or(None)
            .unwrap_or(false);
        settings.set(
            "substitution_mode",
            if partial { "Partial Words" } else { "Auto" },
        );
    }
    settings.remove("match_partial_words");
}

fn encode_line(line: &SubtitleLine) -> Value {
    let mut object = Map::new();
    object.insert(CLASS_MARKER.to_string(), json!("SubtitleLine"));
    object.insert("number".to_string(), json!(line.number));
    if let Some(start) = line.start {
        object.insert("start".to_string(), json!(duration_to_seconds(start)));
    }
    if let Some(end) = line.end {
        object.insert("end".to_string(), json!(duration_to_seconds(end)));
    }
    object.insert("text".to_string(), json!(line.text));
    if let Some(translation) = &line.translation {
        object.insert("translation".to_string(), json!(translation));
    }
    if let Some(original) = &line.original {
        object.insert("original".to_string(), json!(original));
    }
    if !line.metadata.is_empty() {
        object.insert(
            "metadata".to_string(),
            Value::Object(line.metadata.clone().into_iter().collect()),
        );
    }
    Value::Object(object)
}

fn decode_line(value: &Value) -> Option<SubtitleLine> {
    let number = value.get("number")?.as_u64()? as u32;
    let start = value
        .get("start")
        .and_then(Value::as_f64)
        .map(duration_from_seconds);
    let end = value
        .get("end")
        .and_then(Value::as_f64)
        .map(duration_from_seconds);
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let metadata: BTreeMap<String, Value> = value
        .get("metadata")
        .and_then(Value::as_object)
        .map(|map| map.clone().into_iter().collect())
        .unwrap_or_default();

    Some(SubtitleLine {
        number,
        start,
        end,
        text,
        translation: value
            .get("translation")
            .and_then(Value::as_str)
            .map(str::to_string),
        original: value
            .get("original")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata,
    })
}

fn encode_batch(batch: &SubtitleBatch) -> Value {
    let mut object = Map::new();
    object.insert(CLASS_MARKER.to_string(), json!("SubtitleBatch"));
    object.insert("scene".to_string(), json!(batch.scene));
    object.insert("number".to_string(), json!(batch.number));
    if let Some(summary) = &batch.summary {
        object.insert("summary".to_string(), json!(summary));
    }
    if let Some(context) = &batch.context {
        object.insert("context".to_string(), json!(context));
    }
    if let Some(prompt) = &batch.prompt {
        object.insert("prompt".to_string(), json!(prompt));
    }
    if let Some(translation) = &batch.translation {
        object.insert("translation".to_string(), json!(translation));
    }
    if !batch.errors.is_empty() {
        object.insert("errors".to_string(), json!(batch.errors));
    }
    object.insert(
        "originals".to_string(),
        Value::Array(batch.originals.iter().map(encode_line).collect()),
    );
    if !batch.translated.is_empty() {
        object.insert(
            "translated".to_string(),
            Value::Array(batch.translated.iter().map(encode_line).collect()),
        );
    }
    Value::Object(object)
}

fn decode_batch(value: &Value) -> Option<SubtitleBatch> {
    Some(SubtitleBatch {
        scene: value.get("scene")?.as_u64()? as u32,
        number: value.get("number")?.as_u64()? as u32,
        originals: value
            .get("originals")
            .and_then(Value::as_array)
            .map(|lines| lines.iter().filter_map(decode_line).collect())
            .unwrap_or_default(),
        translated: value
            .get("translated")
            .and_then(Value::as_array)
            .map(|lines| lines.iter().filter_map(decode_line).collect())
            .unwrap_or_default(),
        summary: value
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string),
        context: value
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string),
        prompt: value
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_string),
        translation: value
            .get("translation")
            .and_then(Value::as_str)
            .map(str::to_string),
        errors: value
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn encode_scene(scene: &SubtitleScene) -> Value {
    let mut object = Map::new();
    object.insert(CLASS_MARKER.to_string(), json!("SubtitleScene"));
    object.insert("number".to_string(), json!(scene.number));
    if let Some(summary) = &scene.summary {
        object.insert("summary".to_string(), json!(summary));
    }
    if let Some(context) = &scene.context {
        object.insert("context".to_string(), json!(context));
    }
    object.insert(
        "batches".to_string(),
        Value::Array(scene.batches.iter().map(encode_batch).collect()),
    );
    Value::Object(object)
}

fn decode_scene(value: &Value) -> Option<SubtitleScene> {
    Some(SubtitleScene {
        number: value.get("number")?.as_u64()? as u32,
        batches: value
            .get("batches")
            .and_then(Value::as_array)
            .map(|batches| batches.iter().filter_map(decode_batch).collect())
            .unwrap_or_default(),
        summary: value
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string),
        context: value
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Encode the subtitle tree as the project-file JSON document
pub fn encode_project(subtitles: &Subtitles) -> Value {
    let mut object = Map::new();
    object.insert(CLASS_MARKER.to_string(), json!("Subtitles"));
    object.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    if let Some(path) = &subtitles.sourcepath {
        object.insert("sourcepath".to_string(), json!(path.display().to_string()));
    }
    if let Some(path) = &subtitles.outputpath {
        object.insert("outputpath".to_string(), json!(path.display().to_string()));
    }
    if let Some(format) = &subtitles.file_format {
        object.insert("file_format".to_string(), json!(format));
    }
    if !subtitles.metadata.is_empty() {
        object.insert(
            "metadata".to_string(),
            Value::Object(subtitles.metadata.clone().into_iter().collect()),
        );
    }
    object.insert("settings".to_string(), subtitles.settings.to_json());
    object.insert(
        "scenes".to_string(),
        Value::Array(subtitles.scenes.iter().map(encode_scene).collect()),
    );
    Value::Object(object)
}

/// Render the project document as pretty-printed JSON with a four-space
/// indent.
pub fn project_to_string(subtitles: &Subtitles) -> Result<String, SubtitleError> {
    let document = encode_project(subtitles);
    let mut buffer: Vec<u8> = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    serde::Serialize::serialize(&document, &mut serializer)
        .map_err(|error| SubtitleError::parse(format!("Failed to serialise project: {error}")))?;
    String::from_utf8(buffer)
        .map_err(|error| SubtitleError::parse(format!("Project is not valid UTF-8: {error}")))
}

/// Decode a project-file JSON document back into a subtitle tree.
///
/// Legacy settings keys are mapped to their current names.
pub fn decode_project(content: &str) -> Result<Subtitles, SubtitleError> {
    let document: Value = serde_json::from_str(content)
        .map_err(|error| SubtitleError::parse(format!("Invalid project file: {error}")))?;

    let mut settings = Settings::from_json(document.get("settings").unwrap_or(&Value::Null));
    apply_legacy_settings(&mut settings);

    let scenes: Vec<SubtitleScene> = document
        .get("scenes")
        .and_then(Value::as_array)
        .map(|scenes| scenes.iter().filter_map(decode_scene).collect())
        .unwrap_or_default();

    Ok(Subtitles {
        lines: Vec::new(),
        scenes,
        sourcepath: document
            .get("sourcepath")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        outputpath: document
            .get("outputpath")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        file_format: document
            .get("file_format")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata: document
            .get("metadata")
            .and_then(Value::as_object)
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default(),
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingValue;
    use std::time::Duration;

    fn sample_subtitles() -> Subtitles {
        let mut line = SubtitleLine::new(
            1,
            Duration::from_millis(1_500),
            Duration::from_millis(3_250),
            "Hello",
        );
        line.translation = Some("Bonjour".to_string());

        let mut batch = SubtitleBatch::with_lines(1, 1, vec![line.clone()]);
        batch.set_line_translation(1, "Bonjour");
        batch.summary = Some("A greeting".to_string());

        let mut scene = SubtitleScene::new(1);
        scene.batches.push(batch);

        let mut subtitles = Subtitles::new();
        subtitles.scenes.push(scene);
        subtitles.file_format = Some(".srt".to_string());
        subtitles.settings.set("target_language", "French");
        subtitles
    }

    #[test]
    fn test_round_trip_shouldPreserveTreeAndTimings() {
        let subtitles = sample_subtitles();
        let text = project_to_string(&subtitles).unwrap();
        let restored = decode_project(&text).unwrap();

        assert_eq!(restored.scenes.len(), 1);
        let batch = restored.get_batch(1, 1).unwrap();
        assert_eq!(batch.originals.len(), 1);
        assert_eq!(batch.originals[0].start, Some(Duration::from_millis(1_500)));
        assert_eq!(batch.originals[0].end, Some(Duration::from_millis(3_250)));
        assert_eq!(batch.get_translated(1).unwrap().text, "Bonjour");
        assert_eq!(batch.summary.as_deref(), Some("A greeting"));
        assert_eq!(restored.settings.get_str("target_language").as_deref(), Some("French"));
    }

    #[test]
    fn test_encoding_shouldTagClassesAndUseFloatSeconds() {
        let document = encode_project(&sample_subtitles());

        assert_eq!(document.get("_class"), Some(&json!("Subtitles")));
        let scene = &document["scenes"][0];
        assert_eq!(scene.get("_class"), Some(&json!("SubtitleScene")));
        let line = &scene["batches"][0]["originals"][0];
        assert_eq!(line.get("_class"), Some(&json!("SubtitleLine")));
        assert_eq!(line.get("start"), Some(&json!(1.5)));
    }

    #[test]
    fn test_pretty_printing_shouldUseFourSpaceIndent() {
        let text = project_to_string(&sample_subtitles()).unwrap();
        assert!(text.contains("\n    \"_class\""));
    }

    #[test]
    fn test_legacy_settings_shouldMapToCurrentNames() {
        let mut settings = Settings::from_pairs([
            ("gpt_model", SettingValue::from("gpt-4")),
            ("gpt_prompt", SettingValue::from("Translate please")),
            ("synopsis", SettingValue::from("A film about robots")),
            (
                "characters",
                SettingValue::from(vec!["Maria".to_string(), "Rotwang".to_string()]),
            ),
            ("match_partial_words", SettingValue::Bool(true)),
        ]);
        apply_legacy_settings(&mut settings);

        assert_eq!(settings.get_str("model").as_deref(), Some("gpt-4"));
        assert_eq!(settings.get_str("prompt").as_deref(), Some("Translate please"));
        assert_eq!(
            settings.get_str("description").as_deref(),
            Some("A film about robots")
        );
        assert_eq!(
            settings.get_str_list("names"),
            vec!["Maria".to_string(), "Rotwang".to_string()]
        );
        assert_eq!(
            settings.get_str("substitution_mode").as_deref(),
            Some("Partial Words")
        );
        assert!(!settings.contains("gpt_model"));
        assert!(!settings.contains("characters"));
    }
}
