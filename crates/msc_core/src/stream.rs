//! Pull-based restartable input contract.
//!
//! Parsers hand the engine a sequence of typed records. The engine pulls
//! them one at a time and walks the same logical sequence twice, once per
//! pass, so every stream must be able to start over through `rewind`.

use crate::Result;
use msc_common::VertexId;

/// One input record.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A new vertex with its full embedding, value slot included.
    Vertex { id: VertexId, data: Vec<f64> },

    /// An edge between two previously introduced vertices.
    Edge(VertexId, VertexId),

    /// A polyline, consumed as the chain of edges between consecutive ids.
    Path(Vec<VertexId>),

    /// Marks the end of a logical section. Carries no data and is ignored.
    Finalize,

    /// No more records.
    End,
}

/// Source of [`Token`]s that can be traversed more than once.
pub trait TokenStream {
    /// Returns the next record, or [`Token::End`] once exhausted. Calling
    /// again after the end keeps returning [`Token::End`].
    fn next_token(&mut self) -> Result<Token>;

    /// Starts the stream over from its first record.
    fn rewind(&mut self) -> Result<()>;
}

impl<S: TokenStream + ?Sized> TokenStream for Box<S> {
    fn next_token(&mut self) -> Result<Token> {
        (**self).next_token()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}

/// Token stream over records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl MemoryStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    /// Stream of a one-dimensional field: vertex `i` sits at coordinate `i`
    /// with value `values[i]`, followed by the given edges.
    pub fn from_values(values: &[f64], edges: &[(VertexId, VertexId)]) -> Self {
        let mut tokens: Vec<Token> = values
            .iter()
            .enumerate()
            .map(|(i, &value)| Token::Vertex {
                id: i as VertexId,
                data: vec![i as f64, value],
            })
            .collect();
        tokens.extend(edges.iter().map(|&(u, v)| Token::Edge(u, v)));
        Self::new(tokens)
    }

    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }
}

impl TokenStream for MemoryStream {
    fn next_token(&mut self) -> Result<Token> {
        match self.tokens.get(self.cursor) {
            Some(token) => {
                self.cursor += 1;
                Ok(token.clone())
            }
            None => Ok(Token::End),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}
