//! Participant list exports.
//!
//! The PDF is laid out by [`layout`], a pure function over the event and
//! its registrations, and only then drawn with `printpdf`. All coordinates
//! are millimetres from the top-left corner of an A4 page.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference,
    Point,
};
use regex::Regex;

use crate::{events::Event, registrations::Registration};

pub const PAGE_WIDTH: f32 = 210.0;
pub const PAGE_HEIGHT: f32 = 297.0;
pub const MARGIN: f32 = 15.0;
pub const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
/// A row starting below this line goes on a new page.
pub const PAGE_BREAK_Y: f32 = 270.0;
/// Where the table resumes on continuation pages.
pub const CONTINUATION_Y: f32 = 25.0;

const NAME_X: f32 = 25.0;
const TEAM_X: f32 = 80.0;
const DESCRIPTION_X: f32 = 125.0;
const NAME_WIDTH: f32 = 50.0;
const TEAM_WIDTH: f32 = 40.0;
const DESCRIPTION_WIDTH: f32 = CONTENT_WIDTH - DESCRIPTION_X;

const PT_TO_MM: f32 = 0.3528;

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("could not build pdf: {0}")]
    Pdf(#[from] printpdf::Error),
    #[error("could not write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not write csv: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        style: FontStyle,
    },
    Rule {
        x1: f32,
        x2: f32,
        y: f32,
        thickness: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub items: Vec<Item>,
    /// Number of participant rows on this page.
    pub rows: usize,
}

impl PageLayout {
    fn text(&mut self, text: impl Into<String>, x: f32, y: f32, size: f32, style: FontStyle) {
        self.items.push(Item::Text {
            text: text.into(),
            x,
            y,
            size,
            style,
        });
    }

    fn lines(&mut self, lines: &[String], x: f32, y: f32, size: f32) {
        for (i, line) in lines.iter().enumerate() {
            self.text(line.clone(), x, y + i as f32 * size * 0.4, size, FontStyle::Regular);
        }
    }
}

/// Approximate width of `text` in Helvetica. Exact glyph metrics are not
/// needed to decide where lines wrap.
pub fn text_width(text: &str, size: f32, style: FontStyle) -> f32 {
    let em = match style {
        FontStyle::Bold => 0.55,
        FontStyle::Regular | FontStyle::Italic => 0.5,
    };
    text.chars().count() as f32 * size * em * PT_TO_MM
}

/// Greedy word wrap to `width` millimetres. Words longer than a line are
/// split.
pub fn wrap_text(text: &str, width: f32, size: f32) -> Vec<String> {
    let per_char = text_width("x", size, FontStyle::Regular);
    let max_chars = ((width / per_char).floor() as usize).max(1);

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split = word
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            lines.push(word[..split].to_string());
            word = word[split..].to_string();
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn table_header(page: &mut PageLayout, y: f32) {
    let size = 10.0;
    page.text("Token", MARGIN + 2.0, y + 4.0, size, FontStyle::Bold);
    page.text("Name", MARGIN + NAME_X, y + 4.0, size, FontStyle::Bold);
    page.text("Team Name", MARGIN + TEAM_X, y + 4.0, size, FontStyle::Bold);
    page.text(
        "Description",
        MARGIN + DESCRIPTION_X,
        y + 4.0,
        size,
        FontStyle::Bold,
    );
    page.items.push(Item::Rule {
        x1: MARGIN,
        x2: MARGIN + CONTENT_WIDTH,
        y: y + 6.0,
        thickness: 0.3,
    });
}

fn or_dash(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

/// Lays out the participant list. Footers are included on every page.
pub fn layout(
    event: &Event,
    participants: &[Registration],
    generated_at: NaiveDateTime,
) -> Vec<PageLayout> {
    let mut pages = Vec::new();
    let mut page = PageLayout::default();

    page.text(event.title.clone(), MARGIN, 25.0, 20.0, FontStyle::Bold);
    page.items.push(Item::Rule {
        x1: MARGIN,
        x2: MARGIN + text_width(&event.title, 20.0, FontStyle::Bold),
        y: 28.0,
        thickness: 0.5,
    });
    page.text("Participant List", MARGIN, 38.0, 14.0, FontStyle::Bold);

    let time = match event.time.trim() {
        "" => "Not specified",
        time => time,
    };
    page.text(format!("Event Time: {time}"), MARGIN, 50.0, 11.0, FontStyle::Regular);

    let description = match event.description.trim() {
        "" => "No description",
        d => d,
    };
    let description_lines =
        wrap_text(&format!("Description: {description}"), CONTENT_WIDTH, 11.0);
    for (i, line) in description_lines.iter().enumerate() {
        page.text(line.clone(), MARGIN, 58.0 + 5.0 * i as f32, 11.0, FontStyle::Regular);
    }

    let mut y = 58.0 + description_lines.len() as f32 * 5.0 + 10.0;
    page.text(
        format!("Total Participants: {}", participants.len()),
        MARGIN,
        y,
        11.0,
        FontStyle::Bold,
    );
    y += 15.0;

    if participants.is_empty() {
        page.text(
            "No participants registered yet.",
            MARGIN,
            y,
            11.0,
            FontStyle::Italic,
        );
    } else {
        table_header(&mut page, y);
        y += 12.0;

        for p in participants {
            if y > PAGE_BREAK_Y {
                pages.push(std::mem::take(&mut page));
                y = CONTINUATION_Y;
                table_header(&mut page, y);
                y += 12.0;
            }

            let name = wrap_text(
                match p.name.trim() {
                    "" => "N/A",
                    n => n,
                },
                NAME_WIDTH,
                10.0,
            );
            let team = wrap_text(or_dash(p.team_name.as_deref()), TEAM_WIDTH, 10.0);
            let desc = wrap_text(
                or_dash(p.description.as_deref()),
                DESCRIPTION_WIDTH,
                10.0,
            );
            let tallest = name.len().max(team.len()).max(desc.len());
            let row_height = (tallest as f32 * 4.0 + 2.0).max(8.0);

            page.text(format!("#{}", p.token), MARGIN + 2.0, y + 4.0, 10.0, FontStyle::Bold);
            page.lines(&name, MARGIN + NAME_X, y + 4.0, 10.0);
            page.lines(&team, MARGIN + TEAM_X, y + 4.0, 10.0);
            page.lines(&desc, MARGIN + DESCRIPTION_X, y + 4.0, 10.0);
            page.rows += 1;

            y += row_height;
        }
    }
    pages.push(page);

    let total = pages.len();
    let stamp = format!(
        "Generated on: {} at {}",
        generated_at.format("%Y-%m-%d"),
        generated_at.format("%H:%M:%S")
    );
    for (i, page) in pages.iter_mut().enumerate() {
        let footer_y = PAGE_HEIGHT - 10.0;
        page.text(stamp.clone(), MARGIN, footer_y, 8.0, FontStyle::Regular);
        page.text(
            format!("Page {} of {}", i + 1, total),
            PAGE_WIDTH - MARGIN - 20.0,
            footer_y,
            8.0,
            FontStyle::Regular,
        );
    }

    pages
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

impl Fonts {
    fn get(&self, style: FontStyle) -> &IndirectFontRef {
        match style {
            FontStyle::Regular => &self.regular,
            FontStyle::Bold => &self.bold,
            FontStyle::Italic => &self.italic,
        }
    }
}

fn draw(layer: &PdfLayerReference, fonts: &Fonts, page: &PageLayout) {
    for item in &page.items {
        match item {
            Item::Text {
                text,
                x,
                y,
                size,
                style,
            } => {
                layer.use_text(
                    text.as_str(),
                    *size,
                    Mm(*x),
                    Mm(PAGE_HEIGHT - *y),
                    fonts.get(*style),
                );
            }
            Item::Rule {
                x1,
                x2,
                y,
                thickness,
            } => {
                layer.set_outline_thickness(*thickness);
                layer.add_line(Line {
                    points: vec![
                        (Point::new(Mm(*x1), Mm(PAGE_HEIGHT - *y)), false),
                        (Point::new(Mm(*x2), Mm(PAGE_HEIGHT - *y)), false),
                    ],
                    is_closed: false,
                });
            }
        }
    }
}

/// Renders the participant list as a PDF document.
pub fn participants_pdf(
    event: &Event,
    participants: &[Registration],
    generated_at: NaiveDateTime,
) -> Result<Vec<u8>, ExportError> {
    let pages = layout(event, participants, generated_at);

    let (doc, first_page, first_layer) = PdfDocument::new(
        format!("{} participant list", event.title),
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let fonts = Fonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold)?,
        italic: doc.add_builtin_font(BuiltinFont::HelveticaOblique)?,
    };

    for (i, page) in pages.iter().enumerate() {
        let layer = if i == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_index, layer_index) =
                doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            doc.get_page(page_index).get_layer(layer_index)
        };
        draw(&layer, &fonts, page);
    }

    Ok(doc.save_to_bytes()?)
}

/// Token, name, team, email and description of every participant.
pub fn participants_csv(participants: &[Registration]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Token", "Name", "Team Name", "Email", "Description"])?;
    for p in participants {
        writer.write_record([
            p.token.to_string().as_str(),
            p.name.as_str(),
            p.team_name.as_deref().unwrap_or_default(),
            p.email.as_str(),
            p.description.as_deref().unwrap_or_default(),
        ])?;
    }
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

/// `{title}_participant_list.{extension}`, with each run of whitespace in
/// the title replaced by `_`.
pub fn export_filename(title: &str, extension: &str) -> String {
    static WHITESPACE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
    format!(
        "{}_participant_list.{extension}",
        WHITESPACE.replace_all(title, "_")
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::events::tests::event;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 20)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap()
    }

    fn participant(token: i64, description: Option<&str>) -> Registration {
        Registration {
            id: format!("r{token}"),
            event_id: "e".to_string(),
            student_id: format!("s{token}"),
            token,
            name: format!("Student {token}"),
            email: format!("s{token}@x"),
            team_name: None,
            description: description.map(ToString::to_string),
            created_at: at(),
        }
    }

    fn texts(page: &PageLayout) -> Vec<&str> {
        page.items
            .iter()
            .filter_map(|item| match item {
                Item::Text { text, .. } => Some(text.as_str()),
                Item::Rule { .. } => None,
            })
            .collect()
    }

    #[test]
    fn filename_collapses_whitespace() {
        assert_eq!(
            export_filename("Battle  of\tthe Bands", "pdf"),
            "Battle_of_the_Bands_participant_list.pdf"
        );
    }

    #[test]
    fn wrapping_respects_width() {
        let lines = wrap_text(&"word ".repeat(40), 40.0, 10.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, 10.0, FontStyle::Regular) <= 40.0);
        }
        assert_eq!(wrap_text("", 40.0, 10.0), vec![String::new()]);
        assert_eq!(wrap_text("short", 40.0, 10.0), vec!["short"]);
    }

    #[test]
    fn empty_event_has_one_page() {
        let pages = layout(&event("e", "Quiz"), &[], at());
        assert_eq!(pages.len(), 1);
        let texts = texts(&pages[0]);
        assert!(texts.contains(&"No participants registered yet."));
        assert!(texts.contains(&"Total Participants: 0"));
        assert!(texts.contains(&"Event Time: 10:00"));
        assert!(texts.contains(&"Page 1 of 1"));
        assert!(texts.contains(&"Generated on: 2025-08-20 at 09:05:00"));
    }

    #[test]
    fn rows_break_across_pages_with_repeated_header() {
        // one description line: the table starts at y = 100, rows are 8mm
        // high, so 22 rows fit on the first page and 30 on the next
        let ev = event("e", "Quiz");
        let participants: Vec<_> =
            (1..=40).map(|t| participant(t, Some("short"))).collect();
        let pages = layout(&ev, &participants, at());

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].rows, 22);
        assert_eq!(pages[1].rows, 18);
        for (i, page) in pages.iter().enumerate() {
            let texts = texts(page);
            assert!(texts.contains(&"Token"));
            assert!(texts.contains(&"Team Name"));
            assert!(texts.contains(&format!("Page {} of 2", i + 1).as_str()));
        }
        assert!(texts(&pages[1]).contains(&"#23"));
    }

    #[test]
    fn no_trailing_empty_page() {
        let ev = event("e", "Quiz");
        let participants: Vec<_> =
            (1..=22).map(|t| participant(t, None)).collect();
        let pages = layout(&ev, &participants, at());
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].rows, 22);
    }

    #[test]
    fn tall_rows_take_more_room() {
        let ev = event("e", "Quiz");
        let long = "lorem ipsum dolor sit amet ".repeat(12);
        let participants: Vec<_> =
            (1..=10).map(|t| participant(t, Some(&long))).collect();
        let pages = layout(&ev, &participants, at());
        assert!(pages.len() > 1);
        assert!(pages[0].rows < 10);
        assert_eq!(pages.iter().map(|p| p.rows).sum::<usize>(), 10);
    }

    fn text_y(page: &PageLayout, wanted: &str) -> f32 {
        page.items
            .iter()
            .find_map(|item| match item {
                Item::Text { text, y, .. } if text == wanted => Some(*y),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn long_team_rosters_push_the_next_row_down() {
        let mut ev = event("e", "Band night");
        ev.team_event = true;
        let mut team = participant(1, Some("short"));
        team.name = (0..12)
            .map(|i| format!("Member Number {i}"))
            .collect::<Vec<_>>()
            .join(", ");
        team.team_name = Some("Larks".to_string());
        let name_lines = wrap_text(&team.name, NAME_WIDTH, 10.0).len();
        assert!(name_lines > 2);

        let pages = layout(&ev, &[team, participant(2, Some("short"))], at());
        let gap = text_y(&pages[0], "#2") - text_y(&pages[0], "#1");
        assert!(gap >= name_lines as f32 * 4.0, "gap {gap} for {name_lines} lines");
    }

    #[test]
    fn csv_has_header_and_rows() {
        let mut team = participant(1, Some("we sing"));
        team.team_name = Some("Larks".to_string());
        team.name = "a, b".to_string();
        let bytes = participants_csv(&[team, participant(2, None)]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Token,Name,Team Name,Email,Description")
        );
        assert_eq!(lines.next(), Some("1,\"a, b\",Larks,s1@x,we sing"));
        assert_eq!(lines.next(), Some("2,Student 2,,s2@x,"));
    }

    #[test]
    fn pdf_renders() {
        let ev = event("e", "Quiz Night");
        let participants: Vec<_> =
            (1..=30).map(|t| participant(t, Some("hi"))).collect();
        let bytes = participants_pdf(&ev, &participants, at()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
