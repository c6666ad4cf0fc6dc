//! PowerPoint to markdown.
//!
//! Reads the OOXML package directly: slide order comes from
//! `ppt/presentation.xml`, shapes are rendered in tree order. Titles become
//! headings, other text frames become (nested) list items, tables become pipe
//! tables, pictures are copied next to the markdown file unless disabled, and
//! speaker notes follow each slide.

use super::{run_blocking, ExtractionInput, ExtractorOutput, TextExtractor};
use crate::error::{ExtractError, Result};
use crate::methods::Method;
use roxmltree::{Document, Node};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

const RELS_NAMESPACE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

fn engine_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::engine("pptx2md", e)
}

/// Where extracted pictures go and how the markdown links to them.
#[derive(Debug, Clone)]
pub struct ImageSink {
    pub dir: PathBuf,
    pub link_prefix: String,
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
}

fn parse_rels(xml: &str) -> Vec<Relationship> {
    let Ok(doc) = Document::parse(xml) else {
        return Vec::new();
    };
    doc.descendants()
        .filter(|n| is(n, "Relationship"))
        .filter_map(|n| {
            Some(Relationship {
                id: n.attribute("Id")?.to_string(),
                rel_type: n.attribute("Type").unwrap_or_default().to_string(),
                target: n.attribute("Target")?.to_string(),
            })
        })
        .collect()
}

/// Resolve a relationship target against the folder of the part that owns it.
fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| is(n, name))
}

fn children<'a, 'i>(node: Node<'a, 'i>, name: &'static str) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(move |n| is(n, name))
}

fn flag(node: Option<Node>, attr: &str) -> bool {
    node.and_then(|n| n.attribute(attr))
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Text of one run with bold/italic carried over as markdown.
fn run_text(run: Node) -> String {
    let text = child(run, "t").and_then(|t| t.text()).unwrap_or_default();
    if text.trim().is_empty() {
        return text.to_string();
    }
    let props = child(run, "rPr");
    let mut out = text.to_string();
    if flag(props, "b") {
        out = format!("**{}**", out);
    }
    if flag(props, "i") {
        out = format!("*{}*", out);
    }
    out
}

fn paragraph_text(paragraph: Node) -> String {
    paragraph
        .children()
        .filter(|n| n.is_element())
        .map(|n| match n.tag_name().name() {
            "r" | "fld" => run_text(n),
            "br" => " ".to_string(),
            _ => String::new(),
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn placeholder_type<'a>(shape: Node<'a, '_>) -> Option<&'a str> {
    let nv = child(shape, "nvSpPr")?;
    let ph = child(child(nv, "nvPr")?, "ph")?;
    Some(ph.attribute("type").unwrap_or("body"))
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Opened `.pptx` package.
struct Deck {
    archive: ZipArchive<File>,
}

impl Deck {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(engine_err)?;
        let archive = ZipArchive::new(file)
            .map_err(|e| engine_err(format!("Failed to read PPTX archive: {}", e)))?;
        Ok(Self { archive })
    }

    fn read(&mut self, name: &str) -> Option<Vec<u8>> {
        let mut entry = self.archive.by_name(name).ok()?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data).ok()?;
        Some(data)
    }

    fn read_string(&mut self, name: &str) -> Option<String> {
        self.read(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Slide parts in presentation order.
    fn slide_paths(&mut self) -> Vec<String> {
        let rels = self
            .read_string("ppt/_rels/presentation.xml.rels")
            .map(|xml| parse_rels(&xml))
            .unwrap_or_default();

        if let Some(presentation) = self.read_string("ppt/presentation.xml") {
            if let Ok(doc) = Document::parse(&presentation) {
                let ordered: Vec<String> = doc
                    .descendants()
                    .filter(|n| is(n, "sldId"))
                    .filter_map(|n| n.attribute((RELS_NAMESPACE, "id")))
                    .filter_map(|rid| rels.iter().find(|r| r.id == rid))
                    .map(|r| resolve_part("ppt", &r.target))
                    .collect();
                if !ordered.is_empty() {
                    return ordered;
                }
            }
        }

        let mut numbered: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| {
                let num = name
                    .strip_prefix("ppt/slides/slide")?
                    .strip_suffix(".xml")?
                    .parse()
                    .ok()?;
                Some((num, name.to_string()))
            })
            .collect();
        numbered.sort();
        numbered.into_iter().map(|(_, name)| name).collect()
    }
}

/// Renders one slide into markdown lines.
struct SlideRenderer<'d> {
    deck: &'d mut Deck,
    images: Option<&'d ImageSink>,
    rels: Vec<Relationship>,
    slide_dir: String,
    slide_number: usize,
    lines: Vec<String>,
}

impl<'d> SlideRenderer<'d> {
    fn shape(&mut self, node: Node) -> Result<()> {
        match node.tag_name().name() {
            "sp" => self.text_shape(node),
            "graphicFrame" => {
                if let Some(table) = node.descendants().find(|n| is(n, "tbl")) {
                    self.table(table);
                }
            }
            "pic" => self.picture(node)?,
            "grpSp" => {
                for member in node.children().filter(|n| n.is_element()) {
                    self.shape(member)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text_shape(&mut self, shape: Node) {
        let Some(body) = child(shape, "txBody") else {
            return;
        };
        let placeholder = placeholder_type(shape);

        if matches!(placeholder, Some("title" | "ctrTitle")) {
            let title = children(body, "p")
                .map(paragraph_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if !title.is_empty() {
                self.lines.push(format!("# {}", title));
                self.lines.push(String::new());
            }
            return;
        }

        for paragraph in children(body, "p") {
            let text = paragraph_text(paragraph);
            if text.is_empty() {
                continue;
            }
            let level: usize = child(paragraph, "pPr")
                .and_then(|p| p.attribute("lvl"))
                .and_then(|lvl| lvl.parse().ok())
                .unwrap_or(0);
            self.lines
                .push(format!("{}- {}", "  ".repeat(level), text));
        }
    }

    fn table(&mut self, table: Node) {
        let rows: Vec<Vec<String>> = children(table, "tr")
            .map(|row| {
                children(row, "tc")
                    .map(|cell| {
                        let text = child(cell, "txBody")
                            .map(|body| {
                                children(body, "p")
                                    .map(paragraph_text)
                                    .filter(|t| !t.is_empty())
                                    .collect::<Vec<_>>()
                                    .join(" ")
                            })
                            .unwrap_or_default();
                        escape_cell(&text)
                    })
                    .collect()
            })
            .collect();

        let Some(header) = rows.first() else {
            return;
        };
        if !self.lines.last().is_some_and(|l| l.is_empty()) {
            self.lines.push(String::new());
        }
        self.lines.push(format!("| {} |", header.join(" | ")));
        self.lines
            .push(format!("|{}", " --- |".repeat(header.len().max(1))));
        for row in &rows[1..] {
            self.lines.push(format!("| {} |", row.join(" | ")));
        }
        self.lines.push(String::new());
    }

    fn picture(&mut self, pic: Node) -> Result<()> {
        let Some(sink) = self.images else {
            return Ok(());
        };
        let Some(embed) = pic
            .descendants()
            .find(|n| is(n, "blip"))
            .and_then(|blip| blip.attribute((RELS_NAMESPACE, "embed")))
        else {
            return Ok(());
        };
        let Some(rel) = self.rels.iter().find(|r| r.id == embed) else {
            return Ok(());
        };

        let part = resolve_part(&self.slide_dir, &rel.target);
        let Some(data) = self.deck.read(&part) else {
            debug!("Picture part missing from package: {}", part);
            return Ok(());
        };
        let base = part.rsplit('/').next().unwrap_or("image");
        let name = format!("slide{}_{}", self.slide_number, base);
        std::fs::write(sink.dir.join(&name), data).map_err(engine_err)?;

        let alt = pic
            .descendants()
            .find(|n| is(n, "cNvPr"))
            .and_then(|n| n.attribute("descr"))
            .unwrap_or_default();
        self.lines
            .push(format!("![{}]({}/{})", alt, sink.link_prefix, name));
        Ok(())
    }

    fn notes(&mut self) {
        let Some(rel) = self
            .rels
            .iter()
            .find(|r| r.rel_type.ends_with("/notesSlide"))
        else {
            return;
        };
        let part = resolve_part(&self.slide_dir, &rel.target);
        let Some(xml) = self.deck.read_string(&part) else {
            return;
        };
        let Ok(doc) = Document::parse(&xml) else {
            return;
        };

        let notes: Vec<String> = doc
            .descendants()
            .filter(|n| is(n, "sp") && placeholder_type(*n) == Some("body"))
            .filter_map(|sp| child(sp, "txBody"))
            .flat_map(|body| children(body, "p").map(paragraph_text))
            .filter(|t| !t.is_empty())
            .collect();

        if !notes.is_empty() {
            self.lines.push(String::new());
            self.lines.push("### Notes".to_string());
            self.lines.push(String::new());
            self.lines.push(notes.join("\n"));
        }
    }
}

fn render_slide(
    deck: &mut Deck,
    slide_path: &str,
    slide_number: usize,
    images: Option<&ImageSink>,
) -> Result<String> {
    let xml = deck
        .read_string(slide_path)
        .ok_or_else(|| engine_err(format!("Slide part missing: {}", slide_path)))?;
    let doc = Document::parse(&xml)
        .map_err(|e| engine_err(format!("Failed to parse {}: {}", slide_path, e)))?;
    let rels = deck
        .read_string(&rels_path_for(slide_path))
        .map(|xml| parse_rels(&xml))
        .unwrap_or_default();

    let mut renderer = SlideRenderer {
        deck,
        images,
        rels,
        slide_dir: parent_dir(slide_path).to_string(),
        slide_number,
        lines: Vec::new(),
    };

    if let Some(tree) = doc.descendants().find(|n| is(n, "spTree")) {
        for shape in tree.children().filter(|n| n.is_element()) {
            renderer.shape(shape)?;
        }
    }
    renderer.notes();

    Ok(renderer.lines.join("\n").trim().to_string())
}

/// Convert a deck to markdown. Returns the markdown and the slide count.
pub fn convert_deck(pptx: &Path, images: Option<&ImageSink>) -> Result<(String, usize)> {
    let mut deck = Deck::open(pptx)?;
    let slide_paths = deck.slide_paths();

    let mut slides = Vec::with_capacity(slide_paths.len());
    for (idx, path) in slide_paths.iter().enumerate() {
        slides.push(render_slide(&mut deck, path, idx + 1, images)?);
    }

    let mut markdown = slides.join("\n\n---\n\n");
    markdown.push('\n');
    Ok((markdown, slide_paths.len()))
}

/// Converts `.pptx` uploads into `{output_dir}/{stem}.md`.
pub struct SlideConverter {
    output_dir: PathBuf,
}

impl SlideConverter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl TextExtractor for SlideConverter {
    fn method(&self) -> Method {
        Method::Pptx2md
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> Result<ExtractorOutput> {
        info!("Processing PPTX file: {}", input.original_name);
        if !Method::Pptx2md.accepts(input.original_name) {
            return Err(ExtractError::UnsupportedFormat(
                Method::Pptx2md.rejection_message(),
            ));
        }

        let stem = Path::new(input.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("presentation")
            .to_string();
        let md_path = self.output_dir.join(format!("{}.md", stem));
        let images = (!input.options.disable_image).then(|| ImageSink {
            dir: self.output_dir.join(&stem).join("images"),
            link_prefix: format!("{}/images", stem),
        });

        let pptx = input.path.to_path_buf();
        let target = md_path.clone();
        let output_dir = self.output_dir.clone();
        let slide_count = run_blocking("pptx2md", move || {
            std::fs::create_dir_all(&output_dir).map_err(engine_err)?;
            if let Some(sink) = &images {
                std::fs::create_dir_all(&sink.dir).map_err(engine_err)?;
            }
            let (markdown, count) = convert_deck(&pptx, images.as_ref())?;
            std::fs::write(&target, markdown).map_err(engine_err)?;
            Ok(count)
        })
        .await?;

        // The conversion only counts as done if its output can be read back.
        let content = tokio::fs::read_to_string(&md_path)
            .await
            .map_err(|e| engine_err(format!("Converted file unreadable: {}", e)))?;

        info!(
            "PPTX conversion successful ({} slides). Markdown saved at {}",
            slide_count,
            md_path.display()
        );
        Ok(ExtractorOutput::Markdown {
            content,
            filename: format!("{}.md", stem),
        })
    }
}
