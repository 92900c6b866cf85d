//! German analyzers registered on every generation's index.
use tantivy::tokenizer::{
	Language, LowerCaser, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer, Tokenizer,
};
use tantivy::Index;

pub const TEXT_ANALYZER: &str = "de_text";
pub const HTML_ANALYZER: &str = "de_html";

/// Fixed analyzer language.
pub const LANGUAGE: Language = Language::German;

/// The stock German list; an empty filter if tantivy lacks one.
fn stop_words() -> StopWordFilter {
	StopWordFilter::new(LANGUAGE).unwrap_or_else(|| StopWordFilter::remove(Vec::new()))
}

pub fn text_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(stop_words())
		.filter(Stemmer::new(LANGUAGE))
		.build()
}

pub fn html_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(HtmlTokenizer::default())
		.filter(LowerCaser)
		.filter(stop_words())
		.filter(Stemmer::new(LANGUAGE))
		.build()
}

pub fn register(index: &Index) {
	let tokenizers = index.tokenizers();
	tokenizers.register(TEXT_ANALYZER, text_analyzer());
	tokenizers.register(HTML_ANALYZER, html_analyzer());
}

/// Tokenizes the visible text of an HTML fragment.
#[derive(Clone, Default)]
pub struct HtmlTokenizer {
	inner: SimpleTokenizer,
	text: String,
}

impl Tokenizer for HtmlTokenizer {
	type TokenStream<'a> = <SimpleTokenizer as Tokenizer>::TokenStream<'a>;

	fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
		let Self { inner, text: buf } = self;
		*buf = strip_html(text);
		inner.token_stream(buf.as_str())
	}
}

/// Drops tags, comments and `<script>`/`<style>` bodies, then decodes
/// character references. Tags become whitespace so adjacent blocks don't merge.
pub fn strip_html(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;
	while let Some(pos) = rest.find('<') {
		out.push_str(&rest[..pos]);
		rest = &rest[pos..];
		if let Some(body) = rest.strip_prefix("<!--") {
			rest = body.find("-->").map_or("", |end| &body[end + 3..]);
			out.push(' ');
			continue;
		}
		let Some(end) = rest.find('>') else {
			// unterminated tag, keep the text
			break;
		};
		let tag = rest[1..end].trim_start_matches('/').to_ascii_lowercase();
		let name = tag.split(|c: char| c.is_whitespace() || c == '/').next().unwrap_or("");
		rest = &rest[end + 1..];
		if (name == "script" || name == "style") && !rest.is_empty() {
			let close = format!("</{name}");
			rest = find_ascii_ci(rest, &close)
				.and_then(|at| rest[at..].find('>').map(|gt| &rest[at + gt + 1..]))
				.unwrap_or("");
		}
		out.push(' ');
	}
	out.push_str(rest);
	html_escape::decode_html_entities(&out).into_owned()
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
	haystack
		.as_bytes()
		.windows(needle.len())
		.position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
