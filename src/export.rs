//! Plain-text document export of a lesson plan or exam section.
//!
//! Text is wrapped to a fixed width and cut into fixed-height pages; every
//! continuation page repeats the document title as a running header.

use crate::domain::{ExamSection, LessonPlan, Source};
use crate::util::{is_blank, is_paragraph_marker};

pub const WRAP_WIDTH: usize = 90;
pub const LINES_PER_PAGE: usize = 56;
pub const PAGE_BREAK: &str = "\u{000C}";

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
  pub title: String,
  pub pages: Vec<Vec<String>>,
}

impl Document {
  pub fn page_count(&self) -> usize {
    self.pages.len()
  }

  /// Pages joined with form feeds.
  pub fn render(&self) -> String {
    self
      .pages
      .iter()
      .map(|p| p.join("\n"))
      .collect::<Vec<_>>()
      .join(&format!("\n{}\n", PAGE_BREAK))
  }

  pub fn file_name(&self) -> String {
    let slug: String = self
      .title
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
      .collect();
    let slug = slug.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-");
    if slug.is_empty() { "lesson.txt".into() } else { format!("{slug}.txt") }
  }
}

/// Greedy word wrap. Words longer than the width are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
  let width = width.max(1);
  let mut lines = Vec::new();
  let mut line = String::new();
  for word in text.split_whitespace() {
    let mut word: Vec<char> = word.chars().collect();
    while word.len() > width {
      if !line.is_empty() {
        lines.push(std::mem::take(&mut line));
      }
      let rest = word.split_off(width);
      lines.push(word.into_iter().collect());
      word = rest;
    }
    let word: String = word.into_iter().collect();
    let needed = if line.is_empty() { word.chars().count() } else { line.chars().count() + 1 + word.chars().count() };
    if needed > width && !line.is_empty() {
      lines.push(std::mem::take(&mut line));
    }
    if !line.is_empty() {
      line.push(' ');
    }
    line.push_str(&word);
  }
  if !line.is_empty() {
    lines.push(line);
  }
  lines
}

struct Paginator {
  title: String,
  width: usize,
  height: usize,
  pages: Vec<Vec<String>>,
  current: Vec<String>,
}

impl Paginator {
  fn new(title: &str) -> Self {
    Self { title: title.to_string(), width: WRAP_WIDTH, height: LINES_PER_PAGE.max(3), pages: Vec::new(), current: Vec::new() }
  }

  fn line(&mut self, text: impl Into<String>) {
    if self.current.len() >= self.height {
      self.pages.push(std::mem::take(&mut self.current));
      self.current.push(format!("{} (cont.)", self.title));
      self.current.push(String::new());
    }
    self.current.push(text.into());
  }

  fn blank(&mut self) {
    // no blank lines at the top of a page body
    if matches!(self.current.last(), Some(l) if !l.is_empty()) {
      self.line("");
    }
  }

  /// Wrap `text` after `prefix`; continuation lines are indented by `indent`.
  fn wrapped(&mut self, text: &str, prefix: &str, indent: usize) {
    let avail = self.width.saturating_sub(indent.max(prefix.chars().count())).max(1);
    for (i, l) in wrap(text, avail).into_iter().enumerate() {
      if i == 0 {
        self.line(format!("{prefix}{l}"));
      } else {
        self.line(format!("{:indent$}{l}", ""));
      }
    }
  }

  fn numbered(&mut self, n: impl std::fmt::Display, text: &str) {
    let prefix = format!("{n}. ");
    let indent = prefix.chars().count();
    self.wrapped(text, &prefix, indent);
  }

  fn heading(&mut self, text: &str) {
    self.blank();
    self.line(text.to_uppercase());
    self.line("-".repeat(text.chars().count()));
  }

  /// Passage text: each line of the source is its own paragraph, and each
  /// paragraph marker starts a new one on its own line.
  fn passage(&mut self, passage: &str) {
    for (n, chunk) in passage.lines().filter(|l| !is_blank(l)).enumerate() {
      if n > 0 {
        self.blank();
      }
      let mut para: Vec<&str> = Vec::new();
      for word in chunk.split_whitespace() {
        if is_paragraph_marker(word) {
          if !para.is_empty() {
            self.wrapped(&para.join(" "), "", 0);
            para.clear();
          }
          self.blank();
          self.line(word);
        } else {
          para.push(word);
        }
      }
      if !para.is_empty() {
        self.wrapped(&para.join(" "), "", 0);
      }
    }
  }

  fn options(&mut self, options: &[String]) {
    for (i, opt) in options.iter().enumerate() {
      let letter = (b'a' + (i % 26) as u8) as char;
      self.wrapped(opt, &format!("     {letter}) "), 8);
    }
  }

  fn sources(&mut self, sources: &[Source]) {
    if sources.is_empty() {
      return;
    }
    self.heading("Sources");
    for s in sources {
      let title = if is_blank(&s.title) { &s.uri } else { &s.title };
      self.wrapped(&format!("{title} <{}>", s.uri), "- ", 2);
    }
  }

  fn finish(mut self) -> Document {
    if !self.current.is_empty() {
      self.pages.push(self.current);
    }
    Document { title: self.title, pages: self.pages }
  }
}

pub fn export_lesson(plan: &LessonPlan, sources: Option<&[Source]>) -> Document {
  let mut p = Paginator::new(&plan.title);
  p.line(plan.title.clone());
  p.line(format!("CEFR level: {}", plan.cefr_level));

  if !is_blank(&plan.pedagogical_rationale) {
    p.heading("Pedagogical Rationale");
    p.wrapped(&plan.pedagogical_rationale, "", 0);
  }

  p.heading("Reading Passage");
  p.passage(&plan.reading_passage);

  if !plan.key_vocabulary.is_empty() {
    p.heading("Key Vocabulary");
    for v in &plan.key_vocabulary {
      let pos = if is_blank(&v.part_of_speech) { String::new() } else { format!(" ({})", v.part_of_speech) };
      p.wrapped(&format!("{}{}: {}", v.word, pos, v.definition), "- ", 2);
      if !is_blank(&v.example_sentence) {
        p.wrapped(&format!("e.g. {}", v.example_sentence), "    ", 4);
      }
    }
  }

  p.heading("Comprehension Questions");
  for (i, q) in plan.comprehension_questions.iter().enumerate() {
    p.numbered(i + 1, &q.question);
    if let Some(options) = &q.options {
      p.options(options);
    }
  }

  if !plan.writing_prompts.is_empty() {
    p.heading("Writing Prompts");
    for w in &plan.writing_prompts {
      p.wrapped(w, "- ", 2);
    }
  }

  p.heading("Answer Key");
  for (i, q) in plan.comprehension_questions.iter().enumerate() {
    p.numbered(i + 1, &q.answer);
  }

  if let Some(sources) = sources {
    p.sources(sources);
  }
  p.finish()
}

pub fn export_exam(section: &ExamSection) -> Document {
  let mut p = Paginator::new(&section.title);
  p.line(section.title.clone());

  p.heading("Reading Passage");
  p.passage(&section.passage);
  if let Some(credit) = section.source_credit.as_deref().filter(|c| !is_blank(c)) {
    p.blank();
    p.wrapped(credit, "Source: ", 8);
  }

  p.heading("Questions");
  for q in &section.questions {
    let text = if is_blank(&q.paragraph_reference) {
      q.question_text.clone()
    } else {
      format!("{} ({})", q.question_text, q.paragraph_reference)
    };
    p.numbered(q.question_number, &text);
    if let Some(options) = &q.options {
      p.options(options);
    }
  }

  p.heading("Answer Key");
  for q in &section.questions {
    p.numbered(q.question_number, &q.answer);
  }
  p.finish()
}
