use std::fmt;
use std::str::FromStr;

use crate::artifact::{check_segments, Segment};
use crate::error::{AutokrError, Result};

/// Subtitle wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Smi,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Smi => "smi",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SubtitleFormat {
    type Err = AutokrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "smi" | "sami" => Ok(Self::Smi),
            other => Err(AutokrError::Encoding(format!(
                "Unsupported subtitle format '{}'. Supported formats: srt, smi",
                other
            ))),
        }
    }
}

/// Renders segment sequences into subtitle text. No I/O; identical input
/// always yields identical bytes.
///
/// SAMI has no end time, so every cue is followed by a clearing cue
/// (`&nbsp;`) at the segment's end time. The clearing cue is emitted for
/// every segment, also when the next segment starts at the same instant and
/// for zero-duration segments.
#[derive(Debug, Clone)]
pub struct SubtitleEncoder {
    language: String,
}

impl Default for SubtitleEncoder {
    fn default() -> Self {
        Self::new("ko")
    }
}

impl SubtitleEncoder {
    /// `language` is the subtitle text's language tag; it names the SAMI
    /// caption class.
    pub fn new<S: Into<String>>(language: S) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn encode(&self, segments: &[Segment], format: SubtitleFormat) -> Result<String> {
        check_segments(segments).map_err(AutokrError::Encoding)?;
        Ok(match format {
            SubtitleFormat::Srt => encode_srt(segments),
            SubtitleFormat::Smi => self.encode_smi(segments),
        })
    }

    fn encode_smi(&self, segments: &[Segment]) -> String {
        let (class, name, lang) = smi_class(&self.language);

        let mut out = String::new();
        out.push_str("<SAMI>\n<HEAD>\n<TITLE>AutoKR Subtitle</TITLE>\n");
        out.push_str("<STYLE TYPE=\"text/css\">\n<!--\n");
        out.push_str("P { margin-left:8pt; margin-right:8pt; margin-bottom:2pt;\n");
        out.push_str("    margin-top:2pt; font-size:20pt; text-align:center;\n");
        out.push_str("    font-family:Arial; font-weight:normal; color:white; }\n");
        out.push_str(&format!(
            ".{} {{ Name:{}; lang:{}; SAMIType:CC; }}\n",
            class, name, lang
        ));
        out.push_str("-->\n</STYLE>\n</HEAD>\n<BODY>\n");

        for segment in segments {
            out.push_str(&format!("<SYNC Start={}>\n", to_millis(segment.start)));
            out.push_str(&format!("<P Class={}>{}</P>\n", class, smi_text(&segment.text)));
            out.push_str(&format!("<SYNC Start={}>\n", to_millis(segment.end)));
            out.push_str(&format!("<P Class={}>&nbsp;</P>\n", class));
        }

        out.push_str("</BODY>\n</SAMI>\n");
        out
    }
}

/// Encode with the default encoder.
pub fn encode(segments: &[Segment], format: SubtitleFormat) -> Result<String> {
    SubtitleEncoder::default().encode(segments, format)
}

fn encode_srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            srt_text(&segment.text)
        ));
    }
    out
}

/// Seconds to whole milliseconds, rounded to nearest.
fn to_millis(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = to_millis(seconds);
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Stands in for the text line of a silent segment
const BLANK_SRT_LINE: &str = "\u{a0}";

/// A blank line ends an SRT block, so interior blank lines are dropped and a
/// segment without text still gets one non-blank line.
fn srt_text(text: &str) -> String {
    let text = text
        .trim()
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        BLANK_SRT_LINE.to_string()
    } else {
        text
    }
}

fn smi_text(text: &str) -> String {
    let text = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
        })
        .collect::<Vec<_>>()
        .join("<br>");
    if text.is_empty() {
        "&nbsp;".to_string()
    } else {
        text
    }
}

/// Caption class, display name and language tag for the SAMI header.
fn smi_class(language: &str) -> (String, String, String) {
    let code = language.trim().to_lowercase();
    let (name, tag) = match code.as_str() {
        "ko" => ("Korean", "ko-KR"),
        "ja" => ("Japanese", "ja-JP"),
        "en" => ("English", "en-US"),
        "zh" => ("Chinese", "zh-CN"),
        _ => (code.as_str(), code.as_str()),
    };
    let class = format!(
        "{}CC",
        code.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_uppercase()
    );
    (class, name.to_string(), tag.to_string())
}
