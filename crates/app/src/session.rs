use pdf_rag_core::{AnswerSynthesizer, Answer, Embedder, Generator, IngestError, VectorIndex};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::error;

const PREVIEW_CHARS: usize = 350;
const EXIT_WORDS: [&str; 2] = ["quit", "exit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcesMode {
    /// Ask after every answer.
    Ask,
    Always,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub answered: usize,
    pub failed: usize,
}

/// Accepts an existing file with a `.pdf` extension.
pub fn validate_document_path(raw: &str) -> Result<PathBuf, IngestError> {
    let path = Path::new(raw.trim());
    if raw.trim().is_empty() {
        return Err(IngestError::Input("no path given".to_string()));
    }
    if !path.exists() {
        return Err(IngestError::Input(format!(
            "file not found at '{}'",
            path.display()
        )));
    }
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !path.is_file() || !is_pdf {
        return Err(IngestError::Input(format!(
            "'{}' is not a pdf file",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Prompts until a usable path is entered. `None` on end of input.
pub fn prompt_for_document<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> io::Result<Option<PathBuf>> {
    loop {
        write!(output, "Enter the full path to your PDF file: ")?;
        output.flush()?;

        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match validate_document_path(&line) {
            Ok(path) => return Ok(Some(path)),
            Err(error) => {
                error!(%error, "rejected document path");
                writeln!(output, "{error}")?;
            }
        }
    }
}

pub struct Session<'a, G, E: ?Sized> {
    pub index: &'a VectorIndex,
    pub synthesizer: &'a AnswerSynthesizer<G>,
    pub embedder: &'a E,
    pub sources: SourcesMode,
}

impl<'a, G, E> Session<'a, G, E>
where
    G: Generator,
    E: Embedder + ?Sized,
{
    /// Question loop. Ends on an exit word or end of input; failed questions
    /// are reported and the loop keeps going.
    pub fn run<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> io::Result<SessionSummary> {
        let mut summary = SessionSummary::default();

        writeln!(output, "\n--- Ready to Answer Questions ---")?;
        writeln!(
            output,
            "Enter your question about the PDF. Type 'quit' or 'exit' to stop."
        )?;

        loop {
            write!(output, "\nQuery: ")?;
            output.flush()?;

            let Some(line) = read_line(input)? else {
                writeln!(output, "\nExiting query mode.")?;
                break;
            };
            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
                writeln!(output, "Exiting query mode.")?;
                break;
            }

            match self.synthesizer.ask(self.index, question, self.embedder) {
                Ok(answer) => {
                    summary.answered += 1;
                    writeln!(output, "\n--- Answer ---")?;
                    writeln!(output, "{}", answer.text)?;
                    if !self.wants_sources(input, output)? {
                        continue;
                    }
                    print_sources(output, &answer)?;
                }
                Err(failure) => {
                    summary.failed += 1;
                    error!(error = %failure, "an error occurred during querying");
                    writeln!(output, "Error: {failure}")?;
                    writeln!(output, "Please try a different query or type 'quit' to exit.")?;
                }
            }
        }

        Ok(summary)
    }

    fn wants_sources<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> io::Result<bool> {
        if self.sources == SourcesMode::Always {
            return Ok(true);
        }
        write!(output, "\nShow source text chunks? (yes/no, default: no): ")?;
        output.flush()?;
        Ok(read_line(input)?.is_some_and(|reply| {
            matches!(reply.trim().to_lowercase().as_str(), "yes" | "y")
        }))
    }
}

fn print_sources<W: Write>(output: &mut W, answer: &Answer) -> io::Result<()> {
    if answer.sources.is_empty() {
        writeln!(output, "No source node information was returned for this response.")?;
        return Ok(());
    }

    writeln!(output, "\n--- Source Nodes Used ---")?;
    for (rank, hit) in answer.sources.hits.iter().enumerate() {
        let preview: String = hit.segment.text.chars().take(PREVIEW_CHARS).collect();
        writeln!(output, "Source Node {} (Score: {:.4}):", rank + 1, hit.score)?;
        writeln!(output, "'{}...'", preview.trim())?;
    }
    writeln!(output, "-----------------------")?;
    Ok(())
}

fn read_line<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_rag_core::{
        CharacterNgramEmbedder, ChatTurn, GenerationError, GenerationOptions, Segment,
        SynthesisSettings,
    };
    use std::cell::Cell;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    struct ScriptedGenerator {
        calls: Cell<usize>,
        fail_first: bool,
    }

    impl Generator for ScriptedGenerator {
        fn generate(
            &self,
            turns: &[ChatTurn],
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_first && self.calls.get() == 1 {
                return Err(GenerationError::Timeout(120));
            }
            let question = turns
                .last()
                .map(|turn| turn.content.contains("What is AI?"))
                .unwrap_or(false);
            Ok(if question {
                "AI is the simulation of human intelligence in machines.".to_string()
            } else {
                "The document does not cover it.".to_string()
            })
        }
    }

    fn index(embedder: &CharacterNgramEmbedder) -> VectorIndex {
        let text = "Artificial Intelligence (AI) is a branch of computer science.";
        VectorIndex::build(
            vec![Segment {
                position: 0,
                text: text.to_string(),
                token_count: 9,
                overlap_tokens: 0,
                overlap_bytes: 0,
            }],
            embedder,
        )
        .expect("index should build")
    }

    fn run(script: &str, generator: ScriptedGenerator, sources: SourcesMode) -> (String, SessionSummary) {
        let embedder = CharacterNgramEmbedder::default();
        let index = index(&embedder);
        let synthesizer = AnswerSynthesizer::new(generator, SynthesisSettings::default());
        let session = Session {
            index: &index,
            synthesizer: &synthesizer,
            embedder: &embedder,
            sources,
        };

        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut output = Vec::new();
        let summary = session.run(&mut input, &mut output).expect("session io");
        (String::from_utf8(output).expect("utf8 transcript"), summary)
    }

    #[test]
    fn answers_then_exits_on_quit() {
        let (transcript, summary) = run(
            "What is AI?\nno\nquit\n",
            ScriptedGenerator {
                calls: Cell::new(0),
                fail_first: false,
            },
            SourcesMode::Ask,
        );

        assert!(transcript.contains("Ready to Answer Questions"));
        assert!(transcript.contains("Query:"));
        assert!(transcript.contains("--- Answer ---"));
        assert!(transcript.contains("AI is the simulation of human intelligence in machines."));
        assert!(!transcript.contains("Source Nodes Used"));
        assert!(transcript.contains("Exiting query mode."));
        assert_eq!(summary, SessionSummary { answered: 1, failed: 0 });
    }

    #[test]
    fn sources_are_previewed_with_scores_on_request() {
        let (transcript, _) = run(
            "What is AI?\nyes\nEXIT\n",
            ScriptedGenerator {
                calls: Cell::new(0),
                fail_first: false,
            },
            SourcesMode::Ask,
        );

        assert!(transcript.contains("--- Source Nodes Used ---"));
        assert!(transcript.contains("Source Node 1 (Score: "));
        assert!(transcript.contains("'Artificial Intelligence (AI) is a branch of computer science....'"));
    }

    #[test]
    fn failed_question_keeps_the_loop_running() {
        let (transcript, summary) = run(
            "What is AI?\n\nWhat is AI?\n",
            ScriptedGenerator {
                calls: Cell::new(0),
                fail_first: true,
            },
            SourcesMode::Always,
        );

        assert!(transcript.contains("Error: generation failed"));
        assert!(transcript.contains("Please try a different query"));
        assert!(transcript.contains("Source Node 1"));
        assert!(transcript.ends_with("Exiting query mode.\n"));
        assert_eq!(summary, SessionSummary { answered: 1, failed: 1 });
    }

    #[test]
    fn document_prompt_retries_until_a_pdf_is_given() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let notes = dir.path().join("notes.txt");
        let pdf = dir.path().join("manual.pdf");
        fs::write(&notes, b"plain text")?;
        fs::write(&pdf, b"%PDF-1.4\n")?;

        let script = format!(
            "{}\n{}\n{}\n",
            dir.path().join("missing.pdf").display(),
            notes.display(),
            pdf.display()
        );
        let mut input = Cursor::new(script.into_bytes());
        let mut output = Vec::new();

        let chosen = prompt_for_document(&mut input, &mut output)?;
        let transcript = String::from_utf8(output)?;
        assert_eq!(chosen, Some(pdf));
        assert!(transcript.contains("file not found"));
        assert!(transcript.contains("is not a pdf file"));
        Ok(())
    }

    #[test]
    fn document_prompt_stops_at_end_of_input() -> io::Result<()> {
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        assert_eq!(prompt_for_document(&mut input, &mut output)?, None);
        Ok(())
    }
}
