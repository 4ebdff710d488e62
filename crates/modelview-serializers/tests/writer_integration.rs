// Writer integration tests
// Nested creation order, generated key write-back, sparse partial updates

mod common;

use common::*;
use modelview_db::{Database, Query, atomic};
use modelview_serializers::{
	ConfigurationError, Context, RelationError, Resolved, SerializerBuilder, SerializerError, SerializerRegistry,
	TypeDescriptor, ValidationError,
};
use rstest::rstest;
use serde_json::{Value, json};

#[rstest]
#[tokio::test]
async fn test_create_with_new_nested_shelf_round_trips() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({"title": "Dune", "price": 9.5, "shelf": {"name": "sci-fi"}}))
		.unwrap();

	let entity = serializer.create(&db, &mut instance).await.unwrap();

	let shelf_id = instance.nested("shelf").and_then(|s| s.value("id")).cloned().unwrap();
	assert_eq!(instance.value("id"), Some(&json!(1)));
	assert_eq!(instance.pk(), Some(&json!(1)));
	assert_eq!(entity.get("shelf_id"), Some(shelf_id));
	assert_eq!(db.row_count("BookShelf"), 1);
	assert_eq!(db.row_count("Book"), 1);

	let reread = serializer.from_entity(&entity, &Context::new()).await.unwrap();
	assert_eq!(reread.to_json(), instance.to_json());
}

#[rstest]
#[tokio::test]
async fn test_create_links_existing_nested_row() {
	let db = database();
	let shelf = insert_shelf(&db, "history").await;
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({"title": "SPQR", "shelf": {"id": shelf.pk(), "name": "history"}}))
		.unwrap();

	let entity = serializer.create(&db, &mut instance).await.unwrap();

	assert_eq!(db.row_count("BookShelf"), 1);
	assert_eq!(entity.get("shelf_id"), shelf.pk());
}

#[rstest]
#[tokio::test]
async fn test_create_backward_children_after_parent() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("ShelfWithBooksSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({
			"name": "poetry",
			"books": [{"title": "Odes"}, {"title": "Leaves of Grass"}]
		}))
		.unwrap();

	serializer.create(&db, &mut instance).await.unwrap();

	let shelf_pk = instance.pk().cloned().unwrap();
	let books = db
		.fetch(&Query::new("Book").eq("shelf_id", shelf_pk))
		.await
		.unwrap();
	assert_eq!(books.len(), 2);
	let ids: Vec<_> = instance
		.nested_list("books")
		.unwrap()
		.iter()
		.map(|b| b.value("id").cloned())
		.collect();
	assert_eq!(ids, vec![Some(json!(1)), Some(json!(2))]);
}

#[rstest]
#[tokio::test]
async fn test_create_many_to_many_records_associations() {
	let db = database();
	let existing = insert(&db, "Tag", json!({"name": "classic"})).await;
	let registry = registry();
	let serializer = registry.serializer("TaggedBookSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({
			"title": "Emma",
			"tags": [{"id": existing.pk(), "name": "classic"}, {"name": "romance"}]
		}))
		.unwrap();

	let entity = serializer.create(&db, &mut instance).await.unwrap();

	assert_eq!(db.row_count("Tag"), 2);
	let tags = entity.fetch_related("tags").await.unwrap().entities();
	let names: Vec<_> = tags.iter().filter_map(|t| t.get("name")).collect();
	assert_eq!(names, vec![json!("classic"), json!("romance")]);
}

#[rstest]
#[tokio::test]
async fn test_create_validates_whole_tree_before_writing() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({"title": "Dune", "shelf": {}}))
		.unwrap();

	let err = serializer.create(&db, &mut instance).await.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Validation(ValidationError::RequiredFieldUnset { ref class, ref field })
			if class == "ShelfSerializer" && field == "name"
	));
	assert_eq!(db.row_count("Book"), 0);
	assert_eq!(db.row_count("BookShelf"), 0);
	assert_eq!(db.write_count(), 0);
}

#[rstest]
#[tokio::test]
async fn test_create_requires_non_optional_list() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("TaggedBookSerializer").unwrap();
	let mut instance = serializer.from_json(json!({"title": "Emma"})).unwrap();

	let err = serializer.create(&db, &mut instance).await.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Validation(ValidationError::RequiredFieldUnset { ref class, ref field })
			if class == "TaggedBookSerializer" && field == "tags"
	));
	assert_eq!(db.write_count(), 0);

	let mut empty = serializer.from_json(json!({"title": "Emma", "tags": []})).unwrap();
	serializer.create(&db, &mut empty).await.unwrap();
	assert_eq!(db.row_count("Book"), 1);
}

fn featured_shelf_registry() -> SerializerRegistry {
	library_registry()
		.register(
			SerializerBuilder::new("FeaturedShelfSerializer")
				.model("BookShelf")
				.field("name", TypeDescriptor::string())
				.field("featured", TypeDescriptor::nested("BookSummarySerializer").optional())
				.resolver("featured", |entity, _ctx| async move {
					let first = entity.fetch_related("books").await?.entities().into_iter().next();
					Ok::<_, SerializerError>(first.map(Resolved::Entity).unwrap_or(Resolved::Null))
				}),
		)
		.build()
		.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_create_skips_resolver_backed_nested_field() {
	let source = database();
	let shelf = insert_shelf(&source, "s").await;
	insert_book(&source, "Dune", Some(&shelf)).await;
	let registry = featured_shelf_registry();
	let serializer = registry.serializer("FeaturedShelfSerializer").unwrap();
	let mut instance = serializer.from_entity(&shelf, &Context::new()).await.unwrap();
	assert_eq!(
		instance.to_json(),
		json!({"name": "s", "featured": {"id": 1, "title": "Dune"}})
	);

	let copy = database();
	let created = serializer.create(&copy, &mut instance).await.unwrap();

	assert_eq!(created.pk(), shelf.pk());
	assert_eq!(created.get("name"), Some(json!("s")));
	assert_eq!(copy.row_count("BookShelf"), 1);
	assert_eq!(copy.row_count("Book"), 0);
}

#[rstest]
#[tokio::test]
async fn test_nested_serializer_for_other_model_is_rejected() {
	let registry = library_registry()
		.register(
			SerializerBuilder::new("MislabeledBookSerializer")
				.model("Book")
				.field("title", TypeDescriptor::string())
				.field("shelf", TypeDescriptor::nested("TagSerializer").optional()),
		)
		.build()
		.unwrap();
	let db = database();
	let book = insert_book(&db, "Dune", None).await;
	let serializer = registry.serializer("MislabeledBookSerializer").unwrap();
	let payload = json!({"title": "Emma", "shelf": {"name": "romance"}});

	let mut instance = serializer.from_json(payload.clone()).unwrap();
	let err = serializer.create(&db, &mut instance).await.unwrap_err();
	assert!(matches!(
		err,
		SerializerError::Relation(RelationError::TargetModelMismatch { ref field, ref target, ref found, .. })
			if field == "shelf" && target == "BookShelf" && found == "Tag"
	));

	let mut patch = serializer.from_json(payload).unwrap();
	let err = serializer.partial_update(&db, &mut patch, &book).await.unwrap_err();
	assert!(matches!(err, SerializerError::Relation(_)));

	assert_eq!(db.row_count("Tag"), 0);
	assert_eq!(db.row_count("Book"), 1);
	assert_eq!(book.get("title"), Some(json!("Dune")));
}

#[rstest]
#[tokio::test]
async fn test_create_uses_supplied_primary_key() {
	let registry = library_registry()
		.register(
			SerializerBuilder::new("LabelSerializer")
				.model("Tag")
				.field("name", TypeDescriptor::string()),
		)
		.build()
		.unwrap();
	let db = database();
	let serializer = registry.serializer("LabelSerializer").unwrap();
	let mut instance = serializer
		.instance()
		.set("name", "rare")
		.pk(json!(7))
		.build()
		.unwrap();

	let created = serializer.create(&db, &mut instance).await.unwrap();

	assert_eq!(created.pk(), Some(json!(7)));
	assert_eq!(instance.pk(), Some(&json!(7)));
	assert_eq!(db.get("Tag", &json!(7)).await.unwrap().get("name"), Some(json!("rare")));
	assert_eq!(db.row_count("Tag"), 1);
}

#[rstest]
#[tokio::test]
async fn test_create_without_backing_model() {
	let registry = SerializerRegistry::builder()
		.register(SerializerBuilder::new("NoteSerializer").field("text", TypeDescriptor::string()))
		.build()
		.unwrap();
	let db = database();
	let serializer = registry.serializer("NoteSerializer").unwrap();
	let mut instance = serializer.instance().set("text", "hello").build().unwrap();

	let err = serializer.create(&db, &mut instance).await.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Configuration(ConfigurationError::NoBackingModel(_))
	));
}

#[rstest]
#[tokio::test]
async fn test_create_rejects_instance_of_other_class() {
	let db = database();
	let registry = registry();
	let mut shelf = registry
		.serializer("ShelfSerializer")
		.unwrap()
		.instance()
		.set("name", "misc")
		.build()
		.unwrap();

	let err = registry
		.serializer("BookSerializer")
		.unwrap()
		.create(&db, &mut shelf)
		.await
		.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Configuration(ConfigurationError::InstanceClassMismatch { .. })
	));
}

#[rstest]
fn test_has_been_set_tracks_explicit_values() {
	let registry = SerializerRegistry::builder()
		.register(
			SerializerBuilder::new("DraftSerializer")
				.field("title", TypeDescriptor::string())
				.field("note", TypeDescriptor::string().optional())
				.field_with_default("weight", TypeDescriptor::int(), json!(1))
				.field("summary", TypeDescriptor::string().optional()),
		)
		.build()
		.unwrap();
	let serializer = registry.serializer("DraftSerializer").unwrap();

	let parsed = serializer.from_json(json!({"title": "x", "note": null})).unwrap();
	assert!(parsed.has_been_set("title"));
	assert!(parsed.has_been_set("note"));
	assert!(parsed.get("note").unwrap().is_null());
	assert!(!parsed.has_been_set("weight"));
	assert_eq!(parsed.value("weight"), Some(&json!(1)));
	assert!(!parsed.has_been_set("summary"));
	assert!(parsed.get("summary").unwrap().is_unset());

	let built = serializer
		.instance()
		.set("title", "y")
		.set("weight", 1)
		.build()
		.unwrap();
	assert!(built.has_been_set("weight"));
	assert!(!built.has_been_set("note"));
}

#[rstest]
#[case(json!({"title": "x", "isbn": "123"}))]
#[case(json!({"title": "x", "shelf": {"name": "s", "floor": 2}}))]
fn test_from_json_rejects_unknown_keys(#[case] payload: Value) {
	let registry = registry();

	let err = registry
		.serializer("BookSerializer")
		.unwrap()
		.from_json(payload)
		.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Validation(ValidationError::UnknownField { .. })
	));
}

#[rstest]
#[case(json!({"title": 5}))]
#[case(json!({"title": "x", "shelf": [{"name": "s"}]}))]
#[case(json!(["title"]))]
fn test_from_json_rejects_bad_shapes(#[case] payload: Value) {
	let registry = registry();

	let err = registry
		.serializer("BookSerializer")
		.unwrap()
		.from_json(payload)
		.unwrap_err();

	assert!(err.is_validation());
}

#[rstest]
#[tokio::test]
async fn test_partial_update_writes_only_set_fields() {
	let db = database();
	let book = insert(&db, "Book", json!({"title": "Old", "price": 3})).await;
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut patch = serializer.from_json(json!({"title": "New"})).unwrap();

	let changed = serializer.partial_update(&db, &mut patch, &book).await.unwrap();
	let again = serializer.partial_update(&db, &mut patch, &book).await.unwrap();

	assert!(changed);
	assert!(!again);
	let stored = db.get("Book", &book.pk().unwrap()).await.unwrap();
	assert_eq!(stored.get("title"), Some(json!("New")));
	assert_eq!(stored.get("price"), Some(json!(3)));
}

#[rstest]
#[tokio::test]
async fn test_partial_update_explicit_null_clears_relation() {
	let db = database();
	let shelf = insert_shelf(&db, "drafts").await;
	let book = insert_book(&db, "Notes", Some(&shelf)).await;
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut patch = serializer.from_json(json!({"shelf": null})).unwrap();

	let changed = serializer.partial_update(&db, &mut patch, &book).await.unwrap();

	assert!(changed);
	let stored = db.get("Book", &book.pk().unwrap()).await.unwrap();
	assert_eq!(stored.get("shelf_id"), Some(Value::Null));
}

#[rstest]
#[tokio::test]
async fn test_partial_update_raw_foreign_key() {
	let registry = library_registry()
		.register(
			SerializerBuilder::new("BookMoveSerializer")
				.model("Book")
				.field("title", TypeDescriptor::string())
				.field("shelf_id", TypeDescriptor::int().optional()),
		)
		.build()
		.unwrap();
	let db = database();
	let first = insert_shelf(&db, "a").await;
	let second = insert_shelf(&db, "b").await;
	let book = insert_book(&db, "Wanderer", Some(&first)).await;
	let serializer = registry.serializer("BookMoveSerializer").unwrap();
	let mut patch = serializer.from_json(json!({"shelf_id": second.pk()})).unwrap();

	assert!(serializer.partial_update(&db, &mut patch, &book).await.unwrap());
	assert_eq!(book.get("shelf_id"), second.pk());
	assert!(book.cached_related("shelf").is_none());
}

#[rstest]
#[tokio::test]
async fn test_partial_update_patches_related_row_in_place() {
	let db = database();
	let shelf = insert_shelf(&db, "typo").await;
	let book = insert_book(&db, "Dune", Some(&shelf)).await;
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut patch = serializer.from_json(json!({"shelf": {"name": "sci-fi"}})).unwrap();

	assert!(serializer.partial_update(&db, &mut patch, &book).await.unwrap());

	assert_eq!(db.row_count("BookShelf"), 1);
	let stored = db.get("BookShelf", &shelf.pk().unwrap()).await.unwrap();
	assert_eq!(stored.get("name"), Some(json!("sci-fi")));
	assert_eq!(patch.nested("shelf").and_then(|s| s.pk()), shelf.pk().as_ref());
}

#[rstest]
#[tokio::test]
async fn test_partial_update_backward_children() {
	let db = database();
	let shelf = insert_shelf(&db, "mixed").await;
	let kept = insert_book(&db, "Kept", Some(&shelf)).await;
	let renamed = insert_book(&db, "Draft", Some(&shelf)).await;
	let registry = registry();
	let serializer = registry.serializer("ShelfWithBooksSerializer").unwrap();
	let mut patch = serializer
		.from_json(json!({
			"books": [{"id": renamed.pk(), "title": "Final"}, {"title": "Added"}]
		}))
		.unwrap();

	assert!(serializer.partial_update(&db, &mut patch, &shelf).await.unwrap());

	let reread = serializer.from_entity(&shelf, &Context::new()).await.unwrap();
	let titles: Vec<_> = reread
		.nested_list("books")
		.unwrap()
		.iter()
		.map(|b| b.value("title").cloned().unwrap())
		.collect();
	assert_eq!(titles, vec![json!("Kept"), json!("Final"), json!("Added")]);
	assert_eq!(kept.get("title"), Some(json!("Kept")));
}

#[rstest]
#[tokio::test]
async fn test_partial_update_many_to_many_set_semantics() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("TaggedBookSerializer").unwrap();
	let mut created = serializer
		.from_json(json!({"title": "Emma", "tags": [{"name": "a"}, {"name": "b"}]}))
		.unwrap();
	let book = serializer.create(&db, &mut created).await.unwrap();
	let tag_a = created.nested_list("tags").unwrap()[0].pk().cloned().unwrap();

	let mut patch = serializer
		.from_json(json!({"tags": [{"id": tag_a, "name": "a"}, {"name": "c"}]}))
		.unwrap();
	let changed = serializer.partial_update(&db, &mut patch, &book).await.unwrap();

	assert!(changed);
	let fresh = db.get("Book", &book.pk().unwrap()).await.unwrap();
	let reread = serializer.from_entity(&fresh, &Context::new()).await.unwrap();
	let names: Vec<_> = reread
		.nested_list("tags")
		.unwrap()
		.iter()
		.map(|t| t.value("name").cloned().unwrap())
		.collect();
	assert_eq!(names, vec![json!("a"), json!("c")]);

	let mut same = serializer
		.from_json(json!({"tags": [{"id": tag_a, "name": "a"}, {"id": 3, "name": "c"}]}))
		.unwrap();
	assert!(!serializer.partial_update(&db, &mut same, &fresh).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_partial_update_rejects_entity_of_other_model() {
	let db = database();
	let shelf = insert_shelf(&db, "x").await;
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut patch = serializer.from_json(json!({"title": "y"})).unwrap();

	let err = serializer.partial_update(&db, &mut patch, &shelf).await.unwrap_err();

	assert!(matches!(
		err,
		SerializerError::Configuration(ConfigurationError::InstanceClassMismatch { .. })
	));
}

#[rstest]
#[tokio::test]
async fn test_create_inside_caller_transaction_rolls_back() {
	let db = database();
	let registry = registry();
	let serializer = registry.serializer("BookSerializer").unwrap();
	let mut instance = serializer
		.from_json(json!({"title": "Dune", "shelf": {"name": "sci-fi"}}))
		.unwrap();

	let target = &db;
	let pending = &mut instance;

	let result: Result<(), SerializerError> = atomic(&db, || async move {
		serializer.create(target, pending).await?;
		Err(SerializerError::custom("abort after write"))
	})
	.await;

	assert!(result.is_err());
	assert_eq!(db.row_count("Book"), 0);
	assert_eq!(db.row_count("BookShelf"), 0);
}
