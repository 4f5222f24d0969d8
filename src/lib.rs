//! Greedy, non-backtracking matcher for a tiny regular-expression dialect.
//!
//! A pattern is compiled into a flat list of **pairs**, each binding one
//! atom (a literal byte, `.`, a bracket class or a parenthesized group) to
//! one quantifier.  Matching threads a cursor through the pairs from left
//! to right; every quantifier consumes greedily and never gives a
//! repetition back, so a later pair can fail where a backtracking engine
//! would have succeeded (`a*a` never matches).
//!
//! # Architecture
//!
//! ```text
//! pattern ──PatternBuilder::build──>  CompiledPattern  ──find_iter / match_all──>  [Match]
//!                                      │
//!                                      ├─ Pair(Atom::Literal, Quantifier)
//!                                      ├─ Pair(Atom::Class,   Quantifier)
//!                                      └─ Pair(Atom::Group ─> CompiledPattern, Quantifier)
//! ```
//!
//! ## Dialect
//!
//! | syntax            | meaning                                            |
//! |-------------------|----------------------------------------------------|
//! | `x`               | the literal byte `x`                               |
//! | `.`               | any byte except `\n`                               |
//! | `[a-z0-9]`        | one or more inclusive `X-Y` byte ranges            |
//! | `[^a-z]`          | complement of the ranges                           |
//! | `[:digit:]`       | a named predicate class (`[^:digit:]` complements) |
//! | `(...)`           | a nested pattern used as a single atom             |
//! | `? * +`           | zero-or-one, zero-or-more, one-or-more             |
//! | `{n} {n,} {n,m}`  | exactly / at least / between, single-digit bounds  |
//! | `^...` / `...$`   | top-level start / end anchors                      |
//!
//! There is no escaping: any byte that does not open a construct is a
//! literal, including a stray `)`, `]` or `{`.
//!
//! ## Scanning
//!
//! Every offset `0..=len` is a candidate start (only `0` with `^`).  At
//! each start the pairs are applied in order; the first failing pair
//! rejects that start and scanning resumes at `start + 1`, so matches may
//! overlap.  With `$`, candidates that do not end at the end of the subject
//! are filtered out afterwards.  A group atom runs the same threading on
//! its nested pattern at exactly the cursor and consumes the whole span it
//! matched.
//!
//! ## Zero-width repetition
//!
//! Only a group can succeed without consuming input (`(a*)`).  When a
//! repetition makes no progress the loop stops and its lower bound counts
//! as met, since every further repetition would match the same empty span.
//! This is what keeps `(a*)*` finite.

use std::fmt;
use std::io::{self, Write};
use std::iter::FusedIterator;
use std::ops::{Deref, Range};

use thiserror::Error;

/// Default cap on the number of pairs in one pattern level.
pub const DEFAULT_MAX_PAIRS: usize = 128;

/// Default cap on group nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// An error returned when a pattern cannot be compiled.
///
/// Offsets are byte offsets into the pattern handed to
/// [`PatternBuilder::build`], including any leading `^`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// A `[` with no closing `]`.
    #[error("unterminated character class opened at offset {offset}")]
    UnterminatedClass { offset: usize },
    /// Bracket content that is neither a known `:name:` nor a list of
    /// `X-Y` range tokens.
    #[error("malformed character class at offset {offset}")]
    MalformedClass { offset: usize },
    /// A `(` with no matching `)`.
    #[error("unterminated group opened at offset {offset}")]
    UnterminatedGroup { offset: usize },
    /// A `{` quantifier that is not `{n}`, `{n,}` or `{n,m}` with
    /// single-digit bounds and `n <= m`.
    #[error("malformed quantifier at offset {offset}")]
    MalformedQuantifier { offset: usize },
    /// One pattern level would hold more than `limit` pairs.
    #[error("pattern level holds more than {limit} pairs")]
    PatternTooLong { limit: usize },
    /// Groups nest deeper than `limit` levels.
    #[error("groups nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    /// The pair list could not be grown.
    #[error("out of memory while compiling pattern")]
    OutOfMemory,
}

impl CompileError {
    /// `true` for errors caused by resource limits rather than by the
    /// pattern's syntax.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::NestingTooDeep { .. } | Self::OutOfMemory)
    }
}

/// An error returned when matches do not fit a caller-bounded destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MatchError {
    /// More than `capacity` matches exist; the destination holds the first
    /// `capacity` of them.
    #[error("more than {capacity} matches; destination is full")]
    DestinationCapacityExceeded { capacity: usize },
}

// ---------------------------------------------------------------------------
// Character classes
// ---------------------------------------------------------------------------

/// A builtin byte predicate, usable as a class through `[:name:]`.
///
/// All predicates follow the ASCII (`C` locale) definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    Alnum,
    Alpha,
    Digit,
    Lower,
    Upper,
    Space,
    Punct,
    XDigit,
}

impl Predicate {
    /// Every predicate, in the order they are documented.
    pub const ALL: [Predicate; 8] = [
        Predicate::Alnum,
        Predicate::Alpha,
        Predicate::Digit,
        Predicate::Lower,
        Predicate::Upper,
        Predicate::Space,
        Predicate::Punct,
        Predicate::XDigit,
    ];

    /// Look a predicate up by the name used between colons in `[:name:]`.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|predicate| predicate.name().as_bytes() == name)
    }

    /// The name used in `[:name:]`.
    pub fn name(self) -> &'static str {
        match self {
            Predicate::Alnum => "alnum",
            Predicate::Alpha => "alpha",
            Predicate::Digit => "digit",
            Predicate::Lower => "lower",
            Predicate::Upper => "upper",
            Predicate::Space => "space",
            Predicate::Punct => "punct",
            Predicate::XDigit => "xdigit",
        }
    }

    /// Evaluate the predicate on one byte.
    #[inline]
    pub fn test(self, byte: u8) -> bool {
        match self {
            Predicate::Alnum => byte.is_ascii_alphanumeric(),
            Predicate::Alpha => byte.is_ascii_alphabetic(),
            Predicate::Digit => byte.is_ascii_digit(),
            Predicate::Lower => byte.is_ascii_lowercase(),
            Predicate::Upper => byte.is_ascii_uppercase(),
            // `is_ascii_whitespace` leaves out vertical tab.
            Predicate::Space => matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c),
            Predicate::Punct => byte.is_ascii_punctuation(),
            Predicate::XDigit => byte.is_ascii_hexdigit(),
        }
    }
}

/// An inclusive byte range, stored in the order it was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub low: u8,
    pub high: u8,
}

impl ByteRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    /// Test membership.  A reversed range (`z-a`) is treated as `a-z`.
    #[inline]
    pub fn contains(self, byte: u8) -> bool {
        let (min, max) = if self.low <= self.high {
            (self.low, self.high)
        } else {
            (self.high, self.low)
        };
        (min..=max).contains(&byte)
    }
}

/// The base test of a [`ClassSpec`], before complementing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Predicate(Predicate),
    Ranges(Box<[ByteRange]>),
}

/// A character-set test over single bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSpec {
    complement: bool,
    kind: ClassKind,
}

impl ClassSpec {
    /// A class matching any byte inside one of `ranges`.
    pub fn ranges(ranges: impl Into<Box<[ByteRange]>>) -> Self {
        Self {
            complement: false,
            kind: ClassKind::Ranges(ranges.into()),
        }
    }

    /// A class backed by a builtin predicate.
    pub fn predicate(predicate: Predicate) -> Self {
        Self {
            complement: false,
            kind: ClassKind::Predicate(predicate),
        }
    }

    /// Flip the complement flag.
    #[must_use]
    pub fn complemented(mut self) -> Self {
        self.complement = !self.complement;
        self
    }

    pub fn is_complement(&self) -> bool {
        self.complement
    }

    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    /// `complement XOR base`, where `base` is the predicate result or
    /// membership in any of the ranges.
    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        let base = match &self.kind {
            ClassKind::Predicate(predicate) => predicate.test(byte),
            ClassKind::Ranges(ranges) => ranges.iter().any(|range| range.contains(byte)),
        };
        base != self.complement
    }
}

impl fmt::Display for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        if self.complement {
            f.write_str("^")?;
        }
        match &self.kind {
            ClassKind::Predicate(predicate) => write!(f, ":{}:", predicate.name())?,
            ClassKind::Ranges(ranges) => {
                for range in ranges.iter() {
                    write!(f, "{}-{}", range.low.escape_ascii(), range.high.escape_ascii())?;
                }
            }
        }
        f.write_str("]")
    }
}

impl ClassSpec {
    fn write_pattern_bytes(&self, out: &mut Vec<u8>) {
        out.push(b'[');
        if self.complement {
            out.push(b'^');
        }
        match &self.kind {
            ClassKind::Predicate(predicate) => {
                out.push(b':');
                out.extend_from_slice(predicate.name().as_bytes());
                out.push(b':');
            }
            ClassKind::Ranges(ranges) => {
                for range in ranges.iter() {
                    out.extend_from_slice(&[range.low, b'-', range.high]);
                }
            }
        }
        out.push(b']');
    }
}

// ---------------------------------------------------------------------------
// Atoms, quantifiers and pairs
// ---------------------------------------------------------------------------

/// A single match unit, before any quantifier is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Atom {
    /// Matches one exact byte.
    Literal(u8),
    /// `.`: matches any byte except `\n`.
    Any,
    /// `[...]`: matches one byte accepted by the class.
    Class(ClassSpec),
    /// `(...)`: matches the nested pattern anchored at the cursor.
    Group(Box<CompiledPattern>),
}

/// Advance past `subject[cursor]` if it exists and satisfies `accept`.
#[inline]
fn step_if(subject: &[u8], cursor: usize, accept: impl FnOnce(u8) -> bool) -> Option<usize> {
    subject
        .get(cursor)
        .filter(|&&byte| accept(byte))
        .map(|_| cursor + 1)
}

impl Atom {
    /// Try to consume one occurrence of this atom at `cursor`, returning
    /// the cursor just past it.
    ///
    /// Byte atoms advance by exactly one and always fail at end of input.
    /// A group advances by the length of its nested match, possibly zero.
    #[inline]
    fn consume(&self, subject: &[u8], cursor: usize) -> Option<usize> {
        match self {
            Atom::Literal(literal) => step_if(subject, cursor, |byte| byte == *literal),
            Atom::Any => step_if(subject, cursor, |byte| byte != b'\n'),
            Atom::Class(class) => step_if(subject, cursor, |byte| class.matches(byte)),
            Atom::Group(pattern) => pattern.thread(subject, cursor),
        }
    }
}

impl Atom {
    fn write_pattern_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Atom::Literal(byte) => out.push(*byte),
            Atom::Any => out.push(b'.'),
            Atom::Class(class) => class.write_pattern_bytes(out),
            Atom::Group(pattern) => {
                out.push(b'(');
                pattern.write_pair_bytes(out);
                out.push(b')');
            }
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Literal(byte) => write!(f, "{}", byte.escape_ascii()),
            Atom::Any => f.write_str("."),
            Atom::Class(class) => fmt::Display::fmt(class, f),
            Atom::Group(pattern) => {
                f.write_str("(")?;
                pattern.fmt_pairs(f)?;
                f.write_str(")")
            }
        }
    }
}

/// A repetition rule.  The compiler only produces single-digit bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// No suffix: exactly one.
    One,
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
    /// `{n}`
    Exactly(u8),
    /// `{n,}`
    AtLeast(u8),
    /// `{n,m}` with `n <= m`.
    Between(u8, u8),
}

impl Quantifier {
    /// `(min, max)` repetitions, `max == None` meaning unbounded.
    ///
    /// Every quantifier runs as the same greedy loop over these bounds:
    /// consume until an attempt fails or `max` is reached, then succeed
    /// iff at least `min` consumptions happened.  For `One` and
    /// `Exactly(n)` that is fail-fast, since the loop cannot stop early
    /// without ending up short of `min`.
    pub fn bounds(self) -> (usize, Option<usize>) {
        match self {
            Quantifier::One => (1, Some(1)),
            Quantifier::Optional => (0, Some(1)),
            Quantifier::ZeroOrMore => (0, None),
            Quantifier::OneOrMore => (1, None),
            Quantifier::Exactly(n) => (n.into(), Some(n.into())),
            Quantifier::AtLeast(n) => (n.into(), None),
            Quantifier::Between(n, m) => (n.into(), Some(m.into())),
        }
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::One => Ok(()),
            Quantifier::Optional => f.write_str("?"),
            Quantifier::ZeroOrMore => f.write_str("*"),
            Quantifier::OneOrMore => f.write_str("+"),
            Quantifier::Exactly(n) => write!(f, "{{{n}}}"),
            Quantifier::AtLeast(n) => write!(f, "{{{n},}}"),
            Quantifier::Between(n, m) => write!(f, "{{{n},{m}}}"),
        }
    }
}

/// An atom bound to its quantifier; the unit the scanner advances over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair {
    atom: Atom,
    quantifier: Quantifier,
}

impl Pair {
    pub fn new(atom: Atom, quantifier: Quantifier) -> Self {
        Self { atom, quantifier }
    }

    pub fn atom(&self) -> &Atom {
        &self.atom
    }

    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }

    /// Apply the quantifier greedily at `cursor`; see
    /// [`Quantifier::bounds`].
    fn consume(&self, subject: &[u8], cursor: usize) -> Option<usize> {
        let (min, max) = self.quantifier.bounds();
        let mut count = 0;
        let mut at = cursor;
        while max.map_or(true, |max| count < max) {
            let Some(next) = self.atom.consume(subject, at) else {
                break;
            };
            count += 1;
            if next == at {
                // Further repetitions would match the same empty span.
                count = count.max(min);
                break;
            }
            at = next;
        }
        (count >= min).then_some(at)
    }
}

impl Pair {
    fn write_pattern_bytes(&self, out: &mut Vec<u8>) {
        self.atom.write_pattern_bytes(out);
        out.extend_from_slice(self.quantifier.to_string().as_bytes());
    }

    /// The pair in source syntax, byte for byte.
    pub fn to_pattern_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_pattern_bytes(&mut out);
        out
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.atom, self.quantifier)
    }
}

// ---------------------------------------------------------------------------
// Compiled pattern
// ---------------------------------------------------------------------------

/// A compiled pattern: pairs in source order plus the top-level anchors.
///
/// Owns its whole tree, including nested group patterns.  Matching only
/// borrows it, so one pattern can serve any number of scans, from any
/// number of threads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledPattern {
    pairs: Vec<Pair>,
    anchored_start: bool,
    anchored_end: bool,
}

/// What [`CompiledPattern::free`] released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Released {
    /// Pattern nodes: the root plus one per group.
    pub patterns: usize,
    /// Heap-held range lists of bracket classes.
    pub range_buffers: usize,
}

impl CompiledPattern {
    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn num_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// `true` when the pattern started with `^`.
    pub fn anchored_start(&self) -> bool {
        self.anchored_start
    }

    /// `true` when the pattern ended with `$`.
    pub fn anchored_end(&self) -> bool {
        self.anchored_end
    }

    /// Number of groups anywhere in the tree.
    pub fn group_count(&self) -> usize {
        self.pairs
            .iter()
            .map(|pair| match &pair.atom {
                Atom::Group(nested) => 1 + nested.group_count(),
                _ => 0,
            })
            .sum()
    }

    /// Thread a cursor through every pair starting at `start`.  Returns the
    /// cursor after the last pair, or `None` as soon as one fails.
    #[inline]
    fn thread(&self, subject: &[u8], start: usize) -> Option<usize> {
        self.pairs
            .iter()
            .try_fold(start, |cursor, pair| pair.consume(subject, cursor))
    }

    /// Release the tree explicitly, depth first: every nested group is torn
    /// down before the node holding it.  Dropping a pattern frees the same
    /// memory; this variant reports what it released.
    pub fn free(self) -> Released {
        let mut released = Released::default();
        self.release(&mut released);
        released
    }

    fn release(self, released: &mut Released) {
        for pair in self.pairs {
            match pair.atom {
                Atom::Group(nested) => (*nested).release(released),
                Atom::Class(ClassSpec {
                    kind: ClassKind::Ranges(ranges),
                    ..
                }) => {
                    drop(ranges);
                    released.range_buffers += 1;
                }
                _ => {}
            }
        }
        released.patterns += 1;
    }

    /// Return the total memory footprint (in bytes) of this pattern,
    /// including both inline and heap-allocated data.
    ///
    /// This accounts for:
    /// - The `CompiledPattern` struct itself.
    /// - The pair vector's allocation (by capacity).
    /// - Every range list, and every nested group (boxed) recursively.
    pub fn memory_size(&self) -> usize {
        let inline = std::mem::size_of::<Self>();
        let pairs_alloc = self.pairs.capacity() * std::mem::size_of::<Pair>();
        let nested: usize = self
            .pairs
            .iter()
            .map(|pair| match &pair.atom {
                Atom::Group(pattern) => pattern.memory_size(),
                Atom::Class(ClassSpec {
                    kind: ClassKind::Ranges(ranges),
                    ..
                }) => std::mem::size_of_val::<[ByteRange]>(ranges),
                _ => 0,
            })
            .sum();
        inline + pairs_alloc + nested
    }

    fn fmt_pairs(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pairs.iter().try_for_each(|pair| fmt::Display::fmt(pair, f))
    }

    fn write_pair_bytes(&self, out: &mut Vec<u8>) {
        self.pairs
            .iter()
            .for_each(|pair| pair.write_pattern_bytes(out));
    }

    /// Render the pattern back in canonical source syntax, byte for byte.
    /// Compiling the output yields an equal pattern.
    pub fn to_pattern_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.anchored_start {
            out.push(b'^');
        }
        self.write_pair_bytes(&mut out);
        if self.anchored_end {
            out.push(b'$');
        }
        out
    }
}

/// Renders the pattern in canonical source syntax for display, with bytes
/// outside printable ASCII (and `\`, `'`, `"`) escaped as by
/// [`u8::escape_ascii`].  Use [`CompiledPattern::to_pattern_bytes`] for a
/// form that recompiles.
impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anchored_start {
            f.write_str("^")?;
        }
        self.fmt_pairs(f)?;
        if self.anchored_end {
            f.write_str("$")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compile `pattern` with the default limits.
pub fn compile<P: AsRef<[u8]> + ?Sized>(pattern: &P) -> Result<CompiledPattern, CompileError> {
    PatternBuilder::default().build(pattern)
}

/// Builds a [`CompiledPattern`] from pattern text, under configurable
/// limits.
///
/// The pattern is only ever borrowed.  Compilation is all-or-nothing: on
/// error every partially built node is dropped before the error is
/// returned.
#[derive(Clone, Copy, Debug)]
pub struct PatternBuilder {
    max_pairs: usize,
    max_depth: usize,
}

impl Default for PatternBuilder {
    fn default() -> Self {
        Self {
            max_pairs: DEFAULT_MAX_PAIRS,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Read position inside one pattern level.  `base` is the level's offset
/// in the top-level pattern so that errors report absolute offsets.
struct Cursor<'p> {
    text: &'p [u8],
    pos: usize,
    base: usize,
}

impl<'p> Cursor<'p> {
    fn new(text: &'p [u8], base: usize) -> Self {
        Self { text, pos: 0, base }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn rest(&self) -> &'p [u8] {
        &self.text[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Absolute offset of the next unread byte.
    fn offset(&self) -> usize {
        self.base + self.pos
    }
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of pairs in any one pattern level (the top level or
    /// a single group).
    #[must_use]
    pub fn max_pairs(mut self, max_pairs: usize) -> Self {
        self.max_pairs = max_pairs;
        self
    }

    /// Maximum group nesting depth.  `0` forbids groups altogether.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Compile `pattern`.
    ///
    /// A leading `^` and, after that, a trailing `$` are stripped and
    /// recorded as anchors.  Anchors are only recognized here, never inside
    /// a group.
    pub fn build<P: AsRef<[u8]> + ?Sized>(
        &self,
        pattern: &P,
    ) -> Result<CompiledPattern, CompileError> {
        let pattern = pattern.as_ref();
        let anchored_start = pattern.first() == Some(&b'^');
        let body = &pattern[usize::from(anchored_start)..];
        let anchored_end = body.last() == Some(&b'$');
        let body = &body[..body.len() - usize::from(anchored_end)];

        let result = self
            .compile_level(body, usize::from(anchored_start), 0)
            .map(|pairs| CompiledPattern {
                pairs,
                anchored_start,
                anchored_end,
            });
        match &result {
            Ok(compiled) => tracing::debug!(
                pattern = %String::from_utf8_lossy(pattern),
                pairs = compiled.num_pairs(),
                groups = compiled.group_count(),
                anchored_start,
                anchored_end,
                "compiled pattern"
            ),
            Err(error) => tracing::debug!(
                pattern = %String::from_utf8_lossy(pattern),
                %error,
                "pattern rejected"
            ),
        }
        result
    }

    /// Tokenize one pattern level into pairs, recursing into groups.
    fn compile_level(
        &self,
        text: &[u8],
        base: usize,
        depth: usize,
    ) -> Result<Vec<Pair>, CompileError> {
        if depth > self.max_depth {
            return Err(CompileError::NestingTooDeep {
                limit: self.max_depth,
            });
        }

        let mut cursor = Cursor::new(text, base);
        let mut pairs = Vec::new();
        while let Some(byte) = cursor.bump() {
            let atom = match byte {
                b'.' => Atom::Any,
                b'[' => Atom::Class(parse_class(&mut cursor)?),
                b'(' => Atom::Group(Box::new(self.parse_group(&mut cursor, depth)?)),
                literal => Atom::Literal(literal),
            };
            let quantifier = parse_quantifier(&mut cursor)?;

            if pairs.len() == self.max_pairs {
                return Err(CompileError::PatternTooLong {
                    limit: self.max_pairs,
                });
            }
            pairs
                .try_reserve(1)
                .map_err(|_| CompileError::OutOfMemory)?;
            pairs.push(Pair::new(atom, quantifier));
        }
        pairs.shrink_to_fit();
        Ok(pairs)
    }

    /// Compile the group whose `(` was just consumed.
    fn parse_group(
        &self,
        cursor: &mut Cursor<'_>,
        depth: usize,
    ) -> Result<CompiledPattern, CompileError> {
        let open = cursor.offset() - 1;
        let rest = cursor.rest();
        let close = find_group_end(rest).ok_or(CompileError::UnterminatedGroup { offset: open })?;

        tracing::trace!(offset = open, depth = depth + 1, "compiling group");
        let pairs = self.compile_level(&rest[..close], cursor.offset(), depth + 1)?;
        cursor.advance(close + 1);
        Ok(CompiledPattern {
            pairs,
            anchored_start: false,
            anchored_end: false,
        })
    }
}

/// Find the `)` closing a group whose `(` precedes `text`.  Parentheses
/// nest, and a `[...]` span is skipped whole so that `(` and `)` can be
/// used as range endpoints.
fn find_group_end(text: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(i),
            b')' => depth -= 1,
            b'[' => i += text[i + 1..].iter().position(|&b| b == b']')? + 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parse the class whose `[` was just consumed, up to the first `]`.
fn parse_class(cursor: &mut Cursor<'_>) -> Result<ClassSpec, CompileError> {
    let open = cursor.offset() - 1;
    let rest = cursor.rest();
    let len = rest
        .iter()
        .position(|&b| b == b']')
        .ok_or(CompileError::UnterminatedClass { offset: open })?;
    let mut content_offset = cursor.offset();
    cursor.advance(len + 1);

    let mut content = &rest[..len];
    let complement = content.first() == Some(&b'^');
    if complement {
        content = &content[1..];
        content_offset += 1;
    }

    let class = if let Some(predicate) = named_predicate(content) {
        ClassSpec::predicate(predicate)
    } else {
        ClassSpec::ranges(parse_ranges(content, content_offset)?)
    };
    Ok(if complement { class.complemented() } else { class })
}

/// `:name:` for a known predicate name.
fn named_predicate(content: &[u8]) -> Option<Predicate> {
    let name = content.strip_prefix(b":")?.strip_suffix(b":")?;
    Predicate::from_name(name)
}

/// One or more 3-byte `X-Y` tokens.
fn parse_ranges(content: &[u8], offset: usize) -> Result<Box<[ByteRange]>, CompileError> {
    if content.is_empty() || content.len() % 3 != 0 {
        return Err(CompileError::MalformedClass { offset });
    }
    content
        .chunks_exact(3)
        .enumerate()
        .map(|(idx, token)| match *token {
            [low, b'-', high] => Ok(ByteRange::new(low, high)),
            _ => Err(CompileError::MalformedClass {
                offset: offset + idx * 3,
            }),
        })
        .collect()
}

#[inline]
fn decimal_digit(byte: u8) -> Option<u8> {
    byte.is_ascii_digit().then(|| byte - b'0')
}

/// Parse an optional quantifier suffix after an atom.
fn parse_quantifier(cursor: &mut Cursor<'_>) -> Result<Quantifier, CompileError> {
    let quantifier = match cursor.peek() {
        Some(b'?') => Quantifier::Optional,
        Some(b'*') => Quantifier::ZeroOrMore,
        Some(b'+') => Quantifier::OneOrMore,
        Some(b'{') => return parse_braces(cursor),
        _ => return Ok(Quantifier::One),
    };
    cursor.advance(1);
    Ok(quantifier)
}

/// `{n}`, `{n,}` or `{n,m}`, with the cursor on the `{`.
fn parse_braces(cursor: &mut Cursor<'_>) -> Result<Quantifier, CompileError> {
    let malformed = CompileError::MalformedQuantifier {
        offset: cursor.offset(),
    };
    cursor.advance(1);

    let n = cursor.bump().and_then(decimal_digit).ok_or(malformed)?;
    match cursor.bump() {
        Some(b'}') => return Ok(Quantifier::Exactly(n)),
        Some(b',') => {}
        _ => return Err(malformed),
    }
    match cursor.bump() {
        Some(b'}') => Ok(Quantifier::AtLeast(n)),
        Some(byte) => {
            let m = decimal_digit(byte).ok_or(malformed)?;
            match cursor.bump() {
                Some(b'}') if n <= m => Ok(Quantifier::Between(n, m)),
                _ => Err(malformed),
            }
        }
        None => Err(malformed),
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A match span.
///
/// Stored half-open (`start..end`); [`closed`](Self::closed) gives the
/// closed-interval view in which an empty match has `end == start - 1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Match {
    start: usize,
    end: usize,
}

impl Match {
    pub(crate) fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "match ends before it starts");
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last matched byte.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Index of the last matched byte, `None` for an empty match.
    pub fn last(&self) -> Option<usize> {
        self.end.checked_sub(1).filter(|_| !self.is_empty())
    }

    /// `(start, end)` with `end` the index of the last matched byte, or
    /// `start - 1` for an empty match.
    pub fn closed(&self) -> (isize, isize) {
        (self.start as isize, self.end as isize - 1)
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, end) = self.closed();
        write!(f, "({start} - {end})")
    }
}

/// Where scanning resumes after a successful match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Resume at `start + 1`; matches may overlap.
    #[default]
    Overlapping,
    /// Resume at the end of the match (or `start + 1` after an empty one).
    Disjoint,
}

/// Lazy iterator over the matches of a pattern in a subject, ascending by
/// start offset.  Created by [`CompiledPattern::find_iter`].
#[derive(Clone, Debug)]
pub struct FindIter<'p, 's> {
    pattern: &'p CompiledPattern,
    subject: &'s [u8],
    mode: MatchMode,
    next_start: usize,
    /// Last candidate start offset (inclusive).
    last_start: usize,
}

impl Iterator for FindIter<'_, '_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        while self.next_start <= self.last_start {
            let start = self.next_start;
            let found = self.pattern.thread(self.subject, start);
            self.next_start = match (self.mode, found) {
                (MatchMode::Disjoint, Some(end)) if end > start => end,
                _ => start + 1,
            };
            let Some(end) = found else {
                continue;
            };
            // `$` is a filter over the candidates, not a matching step.
            if self.pattern.anchored_end && end != self.subject.len() {
                continue;
            }
            return Some(Match::new(start, end));
        }
        None
    }
}

impl FusedIterator for FindIter<'_, '_> {}

/// The result of [`CompiledPattern::match_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matches {
    spans: Vec<Match>,
    truncated: bool,
}

impl Matches {
    /// `true` when more matches existed than the bound allowed.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// The spans, or [`MatchError::DestinationCapacityExceeded`] if they
    /// were truncated.
    pub fn into_result(self) -> Result<Vec<Match>, MatchError> {
        if self.truncated {
            Err(MatchError::DestinationCapacityExceeded {
                capacity: self.spans.len(),
            })
        } else {
            Ok(self.spans)
        }
    }
}

impl Deref for Matches {
    type Target = [Match];

    fn deref(&self) -> &[Match] {
        &self.spans
    }
}

impl IntoIterator for Matches {
    type Item = Match;
    type IntoIter = std::vec::IntoIter<Match>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.into_iter()
    }
}

impl CompiledPattern {
    /// Iterate over every match in `subject`.
    pub fn find_iter<'s, S: AsRef<[u8]> + ?Sized>(
        &self,
        subject: &'s S,
        mode: MatchMode,
    ) -> FindIter<'_, 's> {
        let subject = subject.as_ref();
        FindIter {
            pattern: self,
            subject,
            mode,
            next_start: 0,
            last_start: if self.anchored_start { 0 } else { subject.len() },
        }
    }

    /// `true` if the pattern matches anywhere in `subject`.
    pub fn is_match<S: AsRef<[u8]> + ?Sized>(&self, subject: &S) -> bool {
        self.find_iter(subject, MatchMode::Overlapping)
            .next()
            .is_some()
    }

    /// Collect up to `max_matches` overlapping matches.
    pub fn match_all<S: AsRef<[u8]> + ?Sized>(&self, subject: &S, max_matches: usize) -> Matches {
        self.match_all_with(subject, max_matches, MatchMode::Overlapping)
    }

    /// Collect up to `max_matches` matches.  If more exist, scanning stops
    /// and the result is flagged [`truncated`](Matches::truncated).
    pub fn match_all_with<S: AsRef<[u8]> + ?Sized>(
        &self,
        subject: &S,
        max_matches: usize,
        mode: MatchMode,
    ) -> Matches {
        let mut iter = self.find_iter(subject, mode);
        let spans: Vec<Match> = iter.by_ref().take(max_matches).collect();
        let truncated = spans.len() == max_matches && iter.next().is_some();
        tracing::debug!(
            subject_len = subject.as_ref().len(),
            matches = spans.len(),
            truncated,
            ?mode,
            "scan finished"
        );
        Matches { spans, truncated }
    }

    /// Write overlapping matches into `dest` and return how many were
    /// written.  If `dest` fills up while matches remain it holds the first
    /// `dest.len()` of them and the call fails.
    pub fn find_into<S: AsRef<[u8]> + ?Sized>(
        &self,
        subject: &S,
        dest: &mut [Match],
    ) -> Result<usize, MatchError> {
        let capacity = dest.len();
        let mut written = 0;
        for found in self.find_iter(subject, MatchMode::Overlapping) {
            let slot = dest
                .get_mut(written)
                .ok_or(MatchError::DestinationCapacityExceeded { capacity })?;
            *slot = found;
            written += 1;
        }
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Escape a label for a double-quoted DOT string.
fn dot_escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

impl CompiledPattern {
    /// A multi-line structural listing: anchors, then every pair in source
    /// order with its atom, quantifier and, for classes and groups, their
    /// contents.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        // Formatting into a `String` cannot fail.
        let _ = self.write_dump(&mut out);
        out
    }

    fn write_dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "pattern `{self}`")?;
        writeln!(out, "  anchored_start: {}", self.anchored_start)?;
        writeln!(out, "  anchored_end: {}", self.anchored_end)?;
        writeln!(out, "  pairs: {}", self.pairs.len())?;
        self.write_dump_pairs(out, 1)
    }

    fn write_dump_pairs(&self, out: &mut impl fmt::Write, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for (idx, pair) in self.pairs.iter().enumerate() {
            write!(out, "{pad}[{idx}] ")?;
            match &pair.atom {
                Atom::Literal(byte) => write!(out, "literal '{}'", byte.escape_ascii())?,
                Atom::Any => write!(out, "any")?,
                Atom::Class(_) => write!(out, "class")?,
                Atom::Group(nested) => write!(out, "group ({} pairs)", nested.pairs.len())?,
            }
            writeln!(out, " {:?}", pair.quantifier)?;

            match &pair.atom {
                Atom::Class(class) => {
                    writeln!(out, "{pad}    complement: {}", class.complement)?;
                    match &class.kind {
                        ClassKind::Predicate(predicate) => {
                            writeln!(out, "{pad}    predicate: {}", predicate.name())?
                        }
                        ClassKind::Ranges(ranges) => {
                            for range in ranges.iter() {
                                writeln!(
                                    out,
                                    "{pad}    range: '{}' - '{}'",
                                    range.low.escape_ascii(),
                                    range.high.escape_ascii()
                                )?;
                            }
                        }
                    }
                }
                Atom::Group(nested) => nested.write_dump_pairs(out, depth + 2)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Emit a Graphviz DOT rendering: each pair is a node chained in source
    /// order, and each group's nested chain sits in its own cluster.
    pub fn to_dot(&self, mut buffer: impl Write) -> io::Result<()> {
        writeln!(buffer, "digraph pattern {{")?;
        writeln!(buffer, "\trankdir=LR;")?;
        let mut next_id = 0;
        self.write_dot_chain(&mut buffer, &mut next_id)?;
        writeln!(buffer, "}}")
    }

    /// Write this level's chain and return the id of its entry node.
    fn write_dot_chain(&self, buffer: &mut impl Write, next_id: &mut usize) -> io::Result<usize> {
        fn fresh(next_id: &mut usize) -> usize {
            let id = *next_id;
            *next_id += 1;
            id
        }

        let entry = fresh(next_id);
        let entry_label = if self.anchored_start { "^" } else { "start" };
        writeln!(buffer, "\tn{entry} [shape=box, label=\"{entry_label}\"];")?;

        let mut prev = entry;
        for pair in &self.pairs {
            let id = fresh(next_id);
            writeln!(
                buffer,
                "\tn{id} [label=\"{}\"];",
                dot_escape(&String::from_utf8_lossy(&pair.to_pattern_bytes()))
            )?;
            writeln!(buffer, "\tn{prev} -> n{id};")?;
            if let Atom::Group(nested) = &pair.atom {
                writeln!(buffer, "\tsubgraph cluster_{id} {{")?;
                let nested_entry = nested.write_dot_chain(buffer, next_id)?;
                writeln!(buffer, "\t}}")?;
                writeln!(buffer, "\tn{id} -> n{nested_entry} [style=dashed];")?;
            }
            prev = id;
        }

        let exit = fresh(next_id);
        let exit_label = if self.anchored_end { "$" } else { "match" };
        writeln!(buffer, "\tn{exit} [peripheries=2, label=\"{exit_label}\"];")?;
        writeln!(buffer, "\tn{prev} -> n{exit};")?;
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
