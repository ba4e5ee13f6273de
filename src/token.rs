#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Zero-width span for synthetic tokens (INDENT/DEDENT/NEWLINE/EOF).
    pub fn point(at: usize, line: usize, column: usize) -> Self {
        Self {
            start: at,
            end: at,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Literals
    Integer(i64),
    Float(f64),
    Str(String),
    True,
    False,

    Identifier(&'a str),

    // Core keywords
    Designate,
    Foresee,
    Alternate,
    Otherwise,
    Cycle,
    While,
    Through,
    From,
    To,
    As,
    Protocol,
    Yield,
    And,
    Or,
    Not,
    Break,
    Continue,

    // Special construct keywords
    Scheme,
    Execute,
    Preview,
    Override,
    Absolute,
    Anomaly,

    // Advanced feature keywords
    Attempt,
    Recover,
    Incorporate,
    Entity,
    Manifest,
    SelfKw,
    Inherits,
    Situation,
    Alignment,
    Ascend,
    Sequence,
    Delegate,
    For,
    Where,
    Async,
    Await,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Assign,
    Walrus,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Arrow,
    Ellipsis,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,

    // Structural
    Newline,
    Indent,
    Dedent,
    EOF,
}

impl<'a> TokenKind<'a> {
    /// Keyword table. Identifiers not listed here stay identifiers.
    pub fn keyword(lexeme: &str) -> Option<TokenKind<'a>> {
        let kind = match lexeme {
            "designate" => Self::Designate,
            "foresee" => Self::Foresee,
            "alternate" => Self::Alternate,
            "otherwise" => Self::Otherwise,
            "cycle" => Self::Cycle,
            "while" => Self::While,
            "through" => Self::Through,
            "from" => Self::From,
            "to" => Self::To,
            "as" => Self::As,
            "protocol" => Self::Protocol,
            "yield" => Self::Yield,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "true" => Self::True,
            "false" => Self::False,
            "scheme" => Self::Scheme,
            "execute" => Self::Execute,
            "preview" => Self::Preview,
            "override" => Self::Override,
            "absolute" => Self::Absolute,
            "anomaly" => Self::Anomaly,
            "attempt" => Self::Attempt,
            "recover" => Self::Recover,
            "incorporate" => Self::Incorporate,
            "entity" => Self::Entity,
            "manifest" => Self::Manifest,
            "self" => Self::SelfKw,
            "inherits" => Self::Inherits,
            "situation" => Self::Situation,
            "alignment" => Self::Alignment,
            "ascend" => Self::Ascend,
            "sequence" => Self::Sequence,
            "delegate" => Self::Delegate,
            "for" => Self::For,
            "where" => Self::Where,
            "async" => Self::Async,
            "await" => Self::Await,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn kind(&self) -> &TokenKind<'a> {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}
