use url::Url;

use super::{ItemId, PlaylistId};

const PLAYLIST_PARAM: &str = "list";
const ITEM_PARAM: &str = "v";

fn query_param(location: &str, name: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Playlist identity of the current location, if any.
pub(crate) fn resolve_identity(location: &str) -> Option<PlaylistId> {
    query_param(location, PLAYLIST_PARAM).map(PlaylistId::new)
}

pub(crate) fn item_id_from_location(location: &str) -> Option<ItemId> {
    query_param(location, ITEM_PARAM).map(ItemId::new)
}

/// Playlist an item link points into. Relative hrefs resolve against the
/// current location.
pub(crate) fn link_playlist(href: &str, base: &str) -> Option<PlaylistId> {
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    query_param(resolved.as_str(), PLAYLIST_PARAM).map(PlaylistId::new)
}
