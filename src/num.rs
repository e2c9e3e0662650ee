use bytemuck::Pod;
use half::f16;

pub trait Zero: Sized + core::ops::Add<Self, Output = Self> {
    fn zero() -> Self;
}

impl Zero for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for f16 {
    fn zero() -> Self {
        Self::ZERO
    }
}

pub trait One: Sized + core::ops::Mul<Self, Output = Self> {
    fn one() -> Self;
}

impl One for f32 {
    fn one() -> Self {
        1.0
    }
}

impl One for f16 {
    fn one() -> Self {
        Self::ONE
    }
}

pub trait Scalar:
    Sized + Clone + Copy + Pod + Zero + One + PartialEq + std::fmt::Debug + sealed::Sealed
{
    /// Reinterpret little-endian bytes as scalars. The bytes need not be aligned.
    fn from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytemuck::pod_collect_to_vec(bytes)
    }
}

impl Scalar for f32 {}

impl Scalar for f16 {}

/// Floats that the layers accept as parameters. All of them widen into `f32` for computation.
pub trait Float: Scalar + Hom<f16> + Hom<f32> + CoHom<f16> + CoHom<f32> {
    #[inline]
    fn to_f32(self) -> f32 {
        self.hom()
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        Self::co_hom(value)
    }
}

impl Float for f32 {}

impl Float for f16 {}

pub trait Hom<Into> {
    fn hom(self) -> Into;
}

impl Hom<f32> for f32 {
    fn hom(self) -> f32 {
        self
    }
}

impl Hom<f16> for f32 {
    fn hom(self) -> f16 {
        f16::from_f32(self)
    }
}

impl Hom<f32> for f16 {
    fn hom(self) -> f32 {
        self.to_f32()
    }
}

impl Hom<f16> for f16 {
    fn hom(self) -> f16 {
        self
    }
}

pub trait CoHom<From> {
    fn co_hom(value: From) -> Self;
}

impl<From, Into> CoHom<From> for Into
where
    From: Hom<Into>,
{
    fn co_hom(value: From) -> Self {
        value.hom()
    }
}

mod sealed {
    use half::f16;

    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f16 {}
}
