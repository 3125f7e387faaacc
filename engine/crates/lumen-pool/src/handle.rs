use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// 指向池中某个元素的不透明句柄
///
/// 泛型 `T` 只用于区分资源种类（Buffer / Texture / ...），不要求 `T` 实现任何 trait。
/// 两个 handle 相等当且仅当 index 和 generation 都相等。
///
/// 全零的 handle 是约定的无效值，池永远不会分配出 index 为 0 的 handle。
pub struct Handle<T> {
    index: u16,
    generation: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// 无效 handle，等价于 `Handle::default()`
    pub const INVALID: Self = Self::from_raw_parts(0, 0);

    #[inline]
    pub const fn from_raw_parts(index: u16, generation: u16) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// 将 handle 打包为 u32：高 16 位是 generation，低 16 位是 index
    #[inline]
    pub const fn to_bits(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self::from_raw_parts((bits & 0xFFFF) as u16, (bits >> 16) as u16)
    }

    #[inline]
    pub const fn index(self) -> u16 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        self.generation
    }

    /// 是否是全零的无效值
    ///
    /// 注意：返回 false 并不代表 handle 在池中有效，需要使用 [`crate::Pool::valid`] 检查
    #[inline]
    pub const fn is_null(self) -> bool {
        self.index == 0 && self.generation == 0
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 只保留类型名的最后一段，例如 `lumen_gfx::resources::handles::Buffer` -> `Buffer`
        let type_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({}v{})", type_name, self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag;

    #[test]
    fn default_handle_is_null() {
        let handle = Handle::<Tag>::default();
        assert!(handle.is_null());
        assert_eq!(handle, Handle::INVALID);
    }

    #[test]
    fn equality_needs_both_fields() {
        let a = Handle::<Tag>::from_raw_parts(3, 1);
        assert_eq!(a, Handle::from_raw_parts(3, 1));
        assert_ne!(a, Handle::from_raw_parts(3, 2));
        assert_ne!(a, Handle::from_raw_parts(4, 1));
    }

    #[test]
    fn bits_keep_index_and_generation() {
        let handle = Handle::<Tag>::from_raw_parts(0xBEEF, 0x0102);
        let bits = handle.to_bits();
        assert_eq!(bits, 0x0102_BEEF);
        assert_eq!(Handle::<Tag>::from_bits(bits), handle);
    }

    #[test]
    fn debug_output_is_short() {
        let handle = Handle::<Tag>::from_raw_parts(7, 2);
        assert_eq!(format!("{:?}", handle), "Handle<Tag>(7v2)");
    }
}
