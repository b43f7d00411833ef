use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;

fn validate_tree(r: &Rope) {
    let mut stack: Vec<&Node> = vec![&*r.root];
    let mut leaf_bytes = 0usize;
    while let Some(node) = stack.pop() {
        match node {
            Node::Leaf(bytes) => leaf_bytes += bytes.len(),
            Node::Internal { left, right, len } => {
                assert_eq!(
                    *len,
                    left.len() + right.len(),
                    "cached length must match children"
                );
                stack.push(right);
                stack.push(left);
            }
        }
    }
    assert_eq!(leaf_bytes, r.len(), "leaf bytes must sum to the rope length");
}

fn bytes_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // Long enough to cross MERGE_THRESHOLD both alone and in pairs.
    prop::collection::vec(any::<u8>(), 0..=300)
}

/// Maps two arbitrary positions onto an ordered range within `0..=len`.
fn range_in(len: usize, a: usize, b: usize) -> (usize, usize) {
    let a = a % (len + 1);
    let b = b % (len + 1);
    (a.min(b), a.max(b))
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 3)]
    Append(#[proptest(strategy = "bytes_strategy()")] Vec<u8>),
    #[proptest(weight = 2)]
    Prepend(#[proptest(strategy = "bytes_strategy()")] Vec<u8>),
    #[proptest(weight = 3)]
    Insert(usize, #[proptest(strategy = "bytes_strategy()")] Vec<u8>),
    #[proptest(weight = 2)]
    Delete(usize, usize),
    #[proptest(weight = 3)]
    Replace(usize, usize, #[proptest(strategy = "bytes_strategy()")] Vec<u8>),
    #[proptest(weight = 1)]
    Slice(usize, usize),
    #[proptest(weight = 1)]
    Double,
}

/// Fails a single write once `limit` bytes are in, then accepts everything
/// again, so a traversal that kept going after the error would be visible.
struct FailOnceSink {
    out: Vec<u8>,
    limit: usize,
    failed: bool,
}

impl io::Write for FailOnceSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.failed && self.out.len() >= self.limit {
            self.failed = true;
            return Err(io::Error::new(io::ErrorKind::Other, "sink hiccup"));
        }
        let n = if self.failed {
            buf.len()
        } else {
            buf.len().min(self.limit - self.out.len())
        };
        self.out.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=200)) {
        let mut r = Rope::empty();
        let mut m: Vec<u8> = Vec::new();

        for op in ops {
            let before = r.clone();
            let before_m = m.clone();

            match op {
                Op::Append(bytes) => {
                    r = r.append(&Rope::new(bytes.clone()));
                    m.extend_from_slice(&bytes);
                }
                Op::Prepend(bytes) => {
                    r = Rope::new(bytes.clone()).append(&r);
                    m.splice(0..0, bytes);
                }
                Op::Insert(at, bytes) => {
                    let i = at % (m.len() + 1);
                    r = r.insert(i, &Rope::new(bytes.clone()));
                    m.splice(i..i, bytes);
                }
                Op::Delete(a, b) => {
                    let (i, j) = range_in(m.len(), a, b);
                    r = r.delete(i, j);
                    m.drain(i..j);
                }
                Op::Replace(a, b, bytes) => {
                    let (i, j) = range_in(m.len(), a, b);
                    r = r.replace(i, j, &Rope::new(bytes.clone()));
                    m.splice(i..j, bytes);
                }
                Op::Slice(a, b) => {
                    let (i, j) = range_in(m.len(), a, b);
                    r = r.slice(i, j);
                    m = m[i..j].to_vec();
                }
                Op::Double => {
                    if m.len() <= 4096 {
                        r = r.append(&r);
                        m.extend_from_within(..);
                    }
                }
            }

            prop_assert_eq!(r.len(), m.len());
            // Deriving a new rope never disturbs the old one.
            prop_assert_eq!(before.to_vec(), before_m);
        }

        validate_tree(&r);
        prop_assert_eq!(r.to_vec(), m);
    }

    #[test]
    fn prop_slice_and_index(
        parts in prop::collection::vec(bytes_strategy(), 0..=8),
        a in any::<usize>(),
        b in any::<usize>(),
    ) {
        let ropes: Vec<Rope> = parts.iter().cloned().map(Rope::new).collect();
        let r = Rope::concat(&ropes);
        let m: Vec<u8> = parts.concat();
        validate_tree(&r);

        prop_assert_eq!(r.to_vec(), m.clone());
        for (i, &expected) in m.iter().enumerate() {
            prop_assert_eq!(r.index(i), expected);
        }
        prop_assert_eq!(r.get(m.len()), None);

        let (i, j) = range_in(m.len(), a, b);
        let s = r.slice(i, j);
        validate_tree(&s);
        prop_assert_eq!(s.to_vec(), m[i..j].to_vec());
        prop_assert_eq!(r.slice(i, i).len(), 0);
        prop_assert_eq!(r.slice(0, m.len()), r.clone());
    }

    #[test]
    fn prop_concat_associative(
        a in bytes_strategy(),
        b in bytes_strategy(),
        c in bytes_strategy(),
    ) {
        let (ra, rb, rc) = (Rope::new(a.clone()), Rope::new(b.clone()), Rope::new(c.clone()));
        let left = ra.append(&rb).append(&rc);
        let right = ra.append(&rb.append(&rc));
        let flat = Rope::concat(&[ra, rb, rc]);
        let expected = [a, b, c].concat();

        prop_assert_eq!(left.to_vec(), expected.clone());
        prop_assert_eq!(right.to_vec(), expected.clone());
        prop_assert_eq!(flat.to_vec(), expected);
    }

    #[test]
    fn prop_write_to_partial(
        parts in prop::collection::vec(bytes_strategy(), 0..=6),
        limit in 0usize..2000,
    ) {
        let ropes: Vec<Rope> = parts.iter().cloned().map(Rope::new).collect();
        let r = Rope::concat(&ropes);
        let m: Vec<u8> = parts.concat();

        let mut sink = FailOnceSink { out: Vec::new(), limit, failed: false };
        match r.write_to(&mut sink) {
            Ok(n) => {
                prop_assert!(limit >= m.len());
                prop_assert_eq!(n, m.len() as u64);
            }
            Err(err) => {
                prop_assert!(limit < m.len());
                prop_assert_eq!(err.written, limit as u64);
            }
        }
        let accepted = limit.min(m.len());
        prop_assert_eq!(sink.out, m[..accepted].to_vec());
        prop_assert_eq!(sink.failed, limit < m.len());
    }
}

/// Every binary bracketing of `items`, in order.
fn bracketings(items: &[Rope]) -> Vec<Rope> {
    if items.len() == 1 {
        return vec![items[0].clone()];
    }
    let mut out = Vec::new();
    for split in 1..items.len() {
        let (lo, hi) = items.split_at(split);
        let rights = bracketings(hi);
        for l in bracketings(lo) {
            for r in &rights {
                out.push(l.append(r));
            }
        }
    }
    out
}

#[test]
fn exhaustive_bracketings_small_set() {
    let pieces: Vec<Vec<u8>> = vec![
        b"ab".to_vec(),
        vec![b'x'; 130],
        b"c".to_vec(),
        vec![b'y'; 63],
        vec![b'z'; 64],
    ];
    let ropes: Vec<Rope> = pieces.iter().cloned().map(Rope::new).collect();
    let expected = pieces.concat();

    let all = bracketings(&ropes);
    // Catalan(4) bracketings of five pieces.
    assert_eq!(all.len(), 14);
    for r in &all {
        validate_tree(r);
        assert_eq!(r.to_vec(), expected);
    }
    assert_eq!(Rope::concat(&ropes).to_vec(), expected);
}

#[test]
fn exhaustive_slices_small_rope() {
    let r = Rope::concat(&[
        Rope::from("ab"),
        Rope::new(vec![b'x'; 130]),
        Rope::from("cd"),
        Rope::new(vec![b'y'; 140]),
    ]);
    let m = r.to_vec();
    validate_tree(&r);

    for i in 0..=m.len() {
        for j in i..=m.len() {
            let s = r.slice(i, j);
            assert_eq!(s.to_vec(), &m[i..j], "slice {i}..{j}");
        }
    }
}
