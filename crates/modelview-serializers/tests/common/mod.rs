// Shared fixtures for serializer integration tests
#![allow(dead_code)]

use modelview_db::memory::MemoryDatabase;
use modelview_db::{EntityRef, ModelCatalog, ModelMeta, RelationMeta};
use modelview_serializers::{
	RegistryBuilder, SerializerBuilder, SerializerRegistry, SerializerSettings, TypeDescriptor,
};
use serde_json::{Value, json};

pub fn catalog() -> ModelCatalog {
	ModelCatalog::new()
		.register(
			ModelMeta::new("BookShelf")
				.column("name")
				.with_relation(RelationMeta::backward_foreign_key("books", "Book", "shelf_id")),
		)
		.register(
			ModelMeta::new("Book")
				.column("title")
				.nullable_column("price")
				.with_relation(RelationMeta::foreign_key("shelf", "BookShelf", "shelf_id").nullable())
				.with_relation(RelationMeta::many_to_many("tags", "Tag", "book_tags", "book_id", "tag_id")),
		)
		.register(ModelMeta::new("Tag").column("name"))
		.register(
			ModelMeta::new("Node")
				.column("name")
				.with_relation(RelationMeta::foreign_key("parent", "Node", "parent_id").nullable())
				.with_relation(RelationMeta::backward_foreign_key("children", "Node", "parent_id")),
		)
}

pub fn shelf_serializer() -> SerializerBuilder {
	SerializerBuilder::new("ShelfSerializer")
		.model("BookShelf")
		.field("id", TypeDescriptor::int().optional())
		.field("name", TypeDescriptor::string())
}

pub fn book_serializer() -> SerializerBuilder {
	SerializerBuilder::new("BookSerializer")
		.model("Book")
		.field("id", TypeDescriptor::int().optional())
		.field("title", TypeDescriptor::string())
		.field("price", TypeDescriptor::float().optional())
		.field("shelf", TypeDescriptor::nested("ShelfSerializer").optional())
}

pub fn book_summary_serializer() -> SerializerBuilder {
	SerializerBuilder::new("BookSummarySerializer")
		.model("Book")
		.field("id", TypeDescriptor::int().optional())
		.field("title", TypeDescriptor::string())
}

pub fn shelf_with_books_serializer() -> SerializerBuilder {
	SerializerBuilder::new("ShelfWithBooksSerializer")
		.model("BookShelf")
		.field("id", TypeDescriptor::int().optional())
		.field("name", TypeDescriptor::string())
		.field("books", TypeDescriptor::nested("BookSummarySerializer").list())
}

pub fn tag_serializer() -> SerializerBuilder {
	SerializerBuilder::new("TagSerializer")
		.model("Tag")
		.field("id", TypeDescriptor::int().optional())
		.field("name", TypeDescriptor::string())
}

pub fn tagged_book_serializer() -> SerializerBuilder {
	SerializerBuilder::new("TaggedBookSerializer")
		.model("Book")
		.field("id", TypeDescriptor::int().optional())
		.field("title", TypeDescriptor::string())
		.field("tags", TypeDescriptor::nested("TagSerializer").list())
}

/// Registry builder preloaded with the library serializers
pub fn library_registry() -> RegistryBuilder {
	SerializerRegistry::builder()
		.catalog(catalog())
		.register(shelf_serializer())
		.register(book_serializer())
		.register(book_summary_serializer())
		.register(shelf_with_books_serializer())
		.register(tag_serializer())
		.register(tagged_book_serializer())
}

pub fn registry() -> SerializerRegistry {
	library_registry().build().unwrap()
}

pub fn registry_with(settings: SerializerSettings) -> SerializerRegistry {
	library_registry().settings(settings).build().unwrap()
}

pub fn database() -> MemoryDatabase {
	MemoryDatabase::new(catalog())
}

pub async fn insert(db: &MemoryDatabase, model: &str, values: Value) -> EntityRef {
	db.insert(model, values).await.unwrap()
}

pub async fn insert_shelf(db: &MemoryDatabase, name: &str) -> EntityRef {
	insert(db, "BookShelf", json!({ "name": name })).await
}

pub async fn insert_book(db: &MemoryDatabase, title: &str, shelf: Option<&EntityRef>) -> EntityRef {
	let shelf_id = shelf.and_then(|s| s.pk()).unwrap_or(Value::Null);
	insert(db, "Book", json!({ "title": title, "shelf_id": shelf_id })).await
}

/// One book per shelf, `count` of each
pub async fn seed_books(db: &MemoryDatabase, count: usize) {
	for i in 0..count {
		let shelf = insert_shelf(db, &format!("shelf-{i}")).await;
		insert(
			db,
			"Book",
			json!({ "title": format!("book-{i}"), "price": i, "shelf_id": shelf.pk() }),
		)
		.await;
	}
}
