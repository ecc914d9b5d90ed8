/// The authenticated user as reported by `/api/0.6/user/details`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetails {
    pub id: u64,
    pub display_name: String,
    /// Empty when the user has no avatar.
    pub image_url: String,
}
