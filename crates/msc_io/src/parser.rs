//! Parser for text mesh files.
//!
//! One record per line, blank lines and `#` comments ignored:
//!
//! ```text
//! v <id> <f64> ...   vertex with its embedding
//! e <id> <id>        edge
//! p <id> <id> ...    path, the chain of edges between consecutive ids
//! f                  end of a section
//! ```

use anyhow::Context;
use msc_core::MscError;
use msc_core::stream::{Token, TokenStream};
use nom::IResult;
use nom::branch::alt;
use nom::character::complete::{char, space0, space1, u32 as vertex_id};
use nom::combinator::{all_consuming, map, value};
use nom::multi::many1;
use nom::number::complete::double;
use nom::sequence::{pair, preceded, terminated};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

fn vertex(input: &str) -> IResult<&str, Token> {
    map(
        preceded(
            char('v'),
            pair(preceded(space1, vertex_id), many1(preceded(space1, double))),
        ),
        |(id, data)| Token::Vertex { id, data },
    )(input)
}

fn edge(input: &str) -> IResult<&str, Token> {
    map(
        preceded(char('e'), pair(preceded(space1, vertex_id), preceded(space1, vertex_id))),
        |(a, b)| Token::Edge(a, b),
    )(input)
}

fn path(input: &str) -> IResult<&str, Token> {
    map(preceded(char('p'), many1(preceded(space1, vertex_id))), Token::Path)(input)
}

fn record(input: &str) -> IResult<&str, Token> {
    all_consuming(terminated(
        alt((vertex, edge, path, value(Token::Finalize, char('f')))),
        space0,
    ))(input)
}

/// Parses one line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Token>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    match record(trimmed) {
        Ok((_, token)) => Ok(Some(token)),
        Err(e) => Err(format!("malformed record `{trimmed}` ({e})")),
    }
}

/// Writes `token` as one line of the text format. [`Token::End`] writes
/// nothing.
pub fn write_record<W: Write>(out: &mut W, token: &Token) -> std::io::Result<()> {
    match token {
        Token::Vertex { id, data } => {
            write!(out, "v {id}")?;
            for x in data {
                write!(out, " {x}")?;
            }
            writeln!(out)
        }
        Token::Edge(a, b) => writeln!(out, "e {a} {b}"),
        Token::Path(ids) => {
            write!(out, "p")?;
            for id in ids {
                write!(out, " {id}")?;
            }
            writeln!(out)
        }
        Token::Finalize => writeln!(out, "f"),
        Token::End => Ok(()),
    }
}

/// Token stream reading a text mesh file.
///
/// The file is re-opened on every rewind, so each pass sees it from the
/// start without the whole mesh ever being held in memory.
pub struct TextStream {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
    buffer: String,
}

impl TextStream {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open mesh file {}", path.display()))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            line: 0,
            buffer: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failure(&self, message: impl std::fmt::Display) -> MscError {
        MscError::Stream(format!("{}:{}: {message}", self.path.display(), self.line))
    }
}

impl TokenStream for TextStream {
    fn next_token(&mut self) -> msc_core::Result<Token> {
        loop {
            self.buffer.clear();
            let read = self
                .reader
                .read_line(&mut self.buffer)
                .map_err(|e| self.failure(e))?;
            if read == 0 {
                return Ok(Token::End);
            }
            self.line += 1;
            match parse_line(&self.buffer) {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => continue,
                Err(message) => return Err(self.failure(message)),
            }
        }
    }

    fn rewind(&mut self) -> msc_core::Result<()> {
        let file = File::open(&self.path).map_err(|e| self.failure(e))?;
        self.reader = BufReader::new(file);
        self.line = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_record_kind() {
        assert_eq!(
            parse_line("v 4 0.5 -1 2e3").unwrap(),
            Some(Token::Vertex { id: 4, data: vec![0.5, -1.0, 2000.0] })
        );
        assert_eq!(parse_line("e 1 2").unwrap(), Some(Token::Edge(1, 2)));
        assert_eq!(parse_line("  p 3 4 5  ").unwrap(), Some(Token::Path(vec![3, 4, 5])));
        assert_eq!(parse_line("f").unwrap(), Some(Token::Finalize));
        assert_eq!(parse_line("# comment").unwrap(), None);
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(parse_line("e 1").is_err());
        assert!(parse_line("e 1 2 3").is_err());
        assert!(parse_line("v 1").is_err());
        assert!(parse_line("v -1 0.0").is_err());
        assert!(parse_line("x 1 2").is_err());
        assert!(parse_line("ve 1 2").is_err());
    }

    #[test]
    fn written_records_parse_back() {
        let tokens = [
            Token::Vertex { id: 9, data: vec![0.25, 3.0] },
            Token::Edge(9, 2),
            Token::Path(vec![1, 2, 3]),
            Token::Finalize,
        ];
        let mut out = Vec::new();
        for token in &tokens {
            write_record(&mut out, token).unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let parsed: Vec<Token> = text
            .lines()
            .filter_map(|line| parse_line(line).unwrap())
            .collect();
        assert_eq!(parsed, tokens);
    }

    #[test]
    fn stream_reports_line_of_bad_record() {
        let path = std::env::temp_dir().join(format!("msc_io_bad_{}.txt", std::process::id()));
        std::fs::write(&path, "v 0 0 1\n\ne 0 zero\n").unwrap();
        let mut stream = TextStream::open(&path).unwrap();
        assert!(matches!(stream.next_token(), Ok(Token::Vertex { id: 0, .. })));
        let err = stream.next_token().unwrap_err();
        assert!(matches!(&err, MscError::Stream(message) if message.contains(":3:")));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn stream_restarts_after_rewind() {
        let path = std::env::temp_dir().join(format!("msc_io_rewind_{}.txt", std::process::id()));
        std::fs::write(&path, "# two vertices\nv 0 0 1\nv 1 1 2\ne 0 1\nf\n").unwrap();
        let mut stream = TextStream::open(&path).unwrap();

        let mut first = Vec::new();
        loop {
            match stream.next_token().unwrap() {
                Token::End => break,
                token => first.push(token),
            }
        }
        assert_eq!(first.len(), 4);

        stream.rewind().unwrap();
        assert_eq!(
            stream.next_token().unwrap(),
            Token::Vertex { id: 0, data: vec![0.0, 1.0] }
        );
        std::fs::remove_file(&path).unwrap();
    }
}
