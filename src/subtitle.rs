//! Burned-in subtitles for chapter videos.
//!
//! Narration is synthesized in one piece, so per-sentence timings are
//! estimated by spreading the audio duration over sentences in proportion to
//! their length.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleLine {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub fn timed_lines(sentences: &[String], total_secs: f64) -> Vec<SubtitleLine> {
    if sentences.is_empty() || total_secs <= 0.0 {
        return Vec::new();
    }
    let weights = sentences
        .iter()
        .map(|s| s.chars().count().max(1) as f64)
        .collect::<Vec<_>>();
    let total_weight: f64 = weights.iter().sum();

    let mut lines = Vec::with_capacity(sentences.len());
    let mut elapsed = 0.0;
    for (idx, (sentence, weight)) in sentences.iter().zip(&weights).enumerate() {
        let start = elapsed;
        let end = if idx + 1 == sentences.len() {
            total_secs
        } else {
            start + total_secs * weight / total_weight
        };
        lines.push(SubtitleLine {
            start,
            end,
            text: sentence.clone(),
        });
        elapsed = end;
    }
    lines
}

pub fn render_ass(lines: &[SubtitleLine]) -> String {
    let mut out = String::from(
        "[Script Info]\n\
         Title: novelcast\n\
         ScriptType: v4.00+\n\
         WrapStyle: 0\n\
         ScaledBorderAndShadow: yes\n\
         PlayResX: 1920\n\
         PlayResY: 1080\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Default,Arial,48,&H00FFFFFF,&H00000000,&H64000000,0,0,0,0,100,100,0,0,1,3,0,2,10,10,20,1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
    );
    for line in lines {
        let text = line
            .text
            .replace(['\r', '\n'], " ")
            .replace('{', "(")
            .replace('}', ")");
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Default,,0,0,0,,{text}",
            format_ass_time(line.start),
            format_ass_time(line.end)
        );
    }
    out
}

/// `H:MM:SS.cc`
pub fn format_ass_time(secs: f64) -> String {
    let centis = (secs.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis / 6_000) % 60;
    let seconds = (centis / 100) % 60;
    let cs = centis % 100;
    format!("{hours}:{minutes:02}:{seconds:02}.{cs:02}")
}
