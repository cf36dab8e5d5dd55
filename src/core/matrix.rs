//! Dense row-major descriptor storage.
//!
//! Every descriptor is one row of a [`Mat`]; the element type is either
//! `u8` (binary descriptors such as ORB/BRIEF) or `f32` (SIFT/SURF-like).
//! The pipeline carries the two cases as the tagged [`DescriptorMatrix`]
//! variant and dispatches distance computation on it.
//!
//! Shape or element-type mismatches on append and search are programmer
//! errors and abort with a diagnostic.

/// Element type tag of a descriptor matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    U8,
    F32,
}

/// Dense row-major matrix with a fixed column count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mat<T> {
    data: Vec<T>,
    cols: usize,
}

impl<T: Copy> Mat<T> {
    pub fn new(cols: usize) -> Self {
        assert!(cols > 0, "descriptor matrix needs at least one column");
        Self {
            data: Vec::new(),
            cols,
        }
    }

    pub fn from_rows(rows: &[&[T]]) -> Self {
        assert!(!rows.is_empty());
        let mut m = Self::new(rows[0].len());
        for r in rows {
            m.push_row(r);
        }
        m
    }

    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn push_row(&mut self, row: &[T]) {
        assert_eq!(
            row.len(),
            self.cols,
            "descriptor width mismatch: got {}, matrix has {}",
            row.len(),
            self.cols
        );
        self.data.extend_from_slice(row);
    }

    pub fn append(&mut self, other: &Mat<T>) {
        assert_eq!(
            other.cols, self.cols,
            "descriptor width mismatch on append: {} vs {}",
            other.cols, self.cols
        );
        self.data.extend_from_slice(&other.data);
    }

    pub fn reserve_rows(&mut self, additional: usize) {
        self.data.reserve(additional * self.cols);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Borrowed view of one descriptor row.
#[derive(Debug, Clone, Copy)]
pub enum RowRef<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

/// Tagged descriptor matrix: all rows share one element type and width.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorMatrix {
    U8(Mat<u8>),
    F32(Mat<f32>),
}

impl DescriptorMatrix {
    /// An empty matrix that adopts the format of the first append.
    pub fn empty() -> Self {
        DescriptorMatrix::U8(Mat {
            data: Vec::new(),
            cols: 0,
        })
    }

    pub fn new(elem: ElemType, cols: usize) -> Self {
        match elem {
            ElemType::U8 => DescriptorMatrix::U8(Mat::new(cols)),
            ElemType::F32 => DescriptorMatrix::F32(Mat::new(cols)),
        }
    }

    pub fn elem_type(&self) -> ElemType {
        match self {
            DescriptorMatrix::U8(_) => ElemType::U8,
            DescriptorMatrix::F32(_) => ElemType::F32,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            DescriptorMatrix::U8(m) => m.rows(),
            DescriptorMatrix::F32(m) => m.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            DescriptorMatrix::U8(m) => m.cols(),
            DescriptorMatrix::F32(m) => m.cols(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DescriptorMatrix::U8(m) => m.is_empty(),
            DescriptorMatrix::F32(m) => m.is_empty(),
        }
    }

    /// True when the two matrices could live in the same vocabulary.
    pub fn same_format(&self, other: &DescriptorMatrix) -> bool {
        self.elem_type() == other.elem_type() && self.cols() == other.cols()
    }

    pub fn row(&self, i: usize) -> RowRef<'_> {
        match self {
            DescriptorMatrix::U8(m) => RowRef::U8(m.row(i)),
            DescriptorMatrix::F32(m) => RowRef::F32(m.row(i)),
        }
    }

    /// Append one row of `other`.
    pub fn push_row_from(&mut self, other: &DescriptorMatrix, i: usize) {
        if self.is_empty() && self.cols() == 0 {
            *self = DescriptorMatrix::new(other.elem_type(), other.cols());
        }
        match (self, other) {
            (DescriptorMatrix::U8(dst), DescriptorMatrix::U8(src)) => dst.push_row(src.row(i)),
            (DescriptorMatrix::F32(dst), DescriptorMatrix::F32(src)) => dst.push_row(src.row(i)),
            _ => panic!("descriptor element type mismatch on append"),
        }
    }

    /// Append all rows of `other`.
    pub fn append(&mut self, other: &DescriptorMatrix) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() && self.cols() == 0 {
            *self = DescriptorMatrix::new(other.elem_type(), other.cols());
        }
        match (self, other) {
            (DescriptorMatrix::U8(dst), DescriptorMatrix::U8(src)) => dst.append(src),
            (DescriptorMatrix::F32(dst), DescriptorMatrix::F32(src)) => dst.append(src),
            _ => panic!("descriptor element type mismatch on append"),
        }
    }

    pub fn reserve_rows(&mut self, additional: usize) {
        match self {
            DescriptorMatrix::U8(m) => m.reserve_rows(additional),
            DescriptorMatrix::F32(m) => m.reserve_rows(additional),
        }
    }

    /// Reset to the adopting-empty state.
    pub fn clear(&mut self) {
        *self = DescriptorMatrix::empty();
    }
}

impl Default for DescriptorMatrix {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_row_access() {
        let mut m = Mat::<u8>::new(4);
        m.push_row(&[1, 2, 3, 4]);
        m.push_row(&[5, 6, 7, 8]);
        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(1), &[5, 6, 7, 8]);
    }

    #[test]
    fn tagged_append_adopts_format() {
        let mut dst = DescriptorMatrix::empty();
        let mut src = Mat::<f32>::new(3);
        src.push_row(&[1.0, 2.0, 3.0]);
        let src = DescriptorMatrix::F32(src);

        dst.append(&src);
        assert_eq!(dst.elem_type(), ElemType::F32);
        assert_eq!(dst.rows(), 1);
        assert_eq!(dst.cols(), 3);

        dst.push_row_from(&src, 0);
        assert_eq!(dst.rows(), 2);
    }

    #[test]
    #[should_panic(expected = "element type mismatch")]
    fn mixed_append_panics() {
        let mut a = DescriptorMatrix::new(ElemType::U8, 2);
        let mut b = Mat::<f32>::new(2);
        b.push_row(&[0.0, 1.0]);
        a.append(&DescriptorMatrix::F32(b));
    }

    #[test]
    #[should_panic(expected = "width mismatch")]
    fn wrong_width_panics() {
        let mut m = Mat::<u8>::new(4);
        m.push_row(&[1, 2, 3]);
    }
}
