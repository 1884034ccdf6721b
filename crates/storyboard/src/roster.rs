use crate::image::DataUri;
use crate::model::{Character, Project, MAX_REFERENCE_IMAGES};
use crate::{Result, StoryboardError};

impl Project {
    pub fn character(&self, id: &str) -> Result<&Character> {
        self.characters
            .iter()
            .find(|character| character.id == id)
            .ok_or_else(|| StoryboardError::UnknownCharacter(id.to_string()))
    }

    /// Finds a character by id, or by case-insensitive name.
    pub fn find_character(&self, key: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|character| character.id == key)
            .or_else(|| {
                self.characters
                    .iter()
                    .find(|character| character.name.eq_ignore_ascii_case(key.trim()))
            })
    }

    fn character_mut(&mut self, id: &str) -> Result<&mut Character> {
        self.characters
            .iter_mut()
            .find(|character| character.id == id)
            .ok_or_else(|| StoryboardError::UnknownCharacter(id.to_string()))
    }

    pub fn add_character(&mut self, name: &str) -> Result<&Character> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoryboardError::EmptyName);
        }
        if self
            .characters
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(name))
        {
            tracing::warn!(name, "adding a character whose name is already in the roster");
        }
        self.characters.push(Character::new(name));
        Ok(&self.characters[self.characters.len() - 1])
    }

    pub fn rename_character(&mut self, id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoryboardError::EmptyName);
        }
        self.character_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn remove_character(&mut self, id: &str) -> Result<Character> {
        let index = self
            .characters
            .iter()
            .position(|character| character.id == id)
            .ok_or_else(|| StoryboardError::UnknownCharacter(id.to_string()))?;
        Ok(self.characters.remove(index))
    }

    /// Appends a reference image, dropping the oldest ones past
    /// [`MAX_REFERENCE_IMAGES`].
    pub fn add_reference_image(&mut self, id: &str, image: &DataUri) -> Result<()> {
        let character = self.character_mut(id)?;
        character.images.push(image.to_string());
        let len = character.images.len();
        if len > MAX_REFERENCE_IMAGES {
            character.images.drain(..len - MAX_REFERENCE_IMAGES);
        }
        Ok(())
    }

    pub fn remove_reference_image(&mut self, id: &str, index: usize) -> Result<String> {
        let character = self.character_mut(id)?;
        if index >= character.images.len() {
            return Err(StoryboardError::InvalidImage(format!(
                "{} has no reference image #{index}",
                character.name
            )));
        }
        Ok(character.images.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(n: u8) -> DataUri {
        DataUri::from_bytes("image/png", &[n])
    }

    #[test]
    fn test_sixth_upload_keeps_five_newest() {
        let mut project = Project::default();
        let id = project.add_character("Jo").unwrap().id.clone();
        for n in 0..6 {
            project.add_reference_image(&id, &image(n)).unwrap();
        }
        let jo = project.character(&id).unwrap();
        assert_eq!(jo.images.len(), MAX_REFERENCE_IMAGES);
        let expected: Vec<String> = (1..6).map(|n| image(n).to_string()).collect();
        assert_eq!(jo.images, expected);
    }

    #[test]
    fn test_add_rejects_blank_name() {
        let mut project = Project::default();
        assert!(matches!(project.add_character("   "), Err(StoryboardError::EmptyName)));
        let added = project.add_character("  Mara ").unwrap();
        assert_eq!(added.name, "Mara");
        assert!(added.id.starts_with("char-"));
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut project = Project::default();
        let id = project.add_character("Mara").unwrap().id.clone();
        assert_eq!(project.find_character("mara").map(|c| c.id.as_str()), Some(id.as_str()));
        project.remove_character(&id).unwrap();
        assert!(project.characters.is_empty());
        assert!(matches!(
            project.remove_character(&id),
            Err(StoryboardError::UnknownCharacter(_))
        ));
    }

    #[test]
    fn test_remove_reference_image() {
        let mut project = Project::default();
        let id = project.add_character("Ren").unwrap().id.clone();
        project.add_reference_image(&id, &image(1)).unwrap();
        project.add_reference_image(&id, &image(2)).unwrap();
        let removed = project.remove_reference_image(&id, 0).unwrap();
        assert_eq!(removed, image(1).to_string());
        assert!(project.remove_reference_image(&id, 3).is_err());
    }
}
