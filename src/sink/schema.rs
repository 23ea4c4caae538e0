// Target tables of the EAV store. Column names are quoted PascalCase in the
// database, hence the explicit `sql_name`s.

diesel::table! {
    #[sql_name = "Objects"]
    objects (number) {
        #[sql_name = "Number"]
        number -> Text,
        #[sql_name = "Kind"]
        kind -> Int4,
        #[sql_name = "ParentNumber"]
        parent_number -> Text,
        #[sql_name = "StructureID"]
        structure_id -> Text,
        #[sql_name = "UpdateDate"]
        update_date -> Timestamp,
        #[sql_name = "CreatedDate"]
        created_date -> Timestamp,
        #[sql_name = "State"]
        state -> Text,
        #[sql_name = "OperStoragePeriod"]
        oper_storage_period -> Timestamp,
        #[sql_name = "TempStoragePeriod"]
        temp_storage_period -> Timestamp,
        #[sql_name = "ClassType"]
        class_type -> Text,
        #[sql_name = "LastStoragePeriod"]
        last_storage_period -> Timestamp,
        #[sql_name = "Version"]
        version -> Text,
        #[sql_name = "Received"]
        received -> Nullable<Timestamp>,
    }
}

diesel::table! {
    #[sql_name = "SearchAttributes"]
    search_attributes (id) {
        #[sql_name = "ID"]
        id -> Text,
        #[sql_name = "Name"]
        name -> Text,
        #[sql_name = "ParentNumber"]
        parent_number -> Text,
        #[sql_name = "ParentAttrId"]
        parent_attr_id -> Nullable<Text>,
        #[sql_name = "Kind"]
        kind -> Int4,
        #[sql_name = "CreatedBy"]
        created_by -> Text,
        #[sql_name = "CreatedDate"]
        created_date -> Timestamp,
        #[sql_name = "TextValue"]
        text_value -> Nullable<Text>,
        #[sql_name = "IntValue"]
        int_value -> Nullable<Int8>,
        #[sql_name = "DateValue"]
        date_value -> Nullable<Timestamp>,
        #[sql_name = "GuidValue"]
        guid_value -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(objects, search_attributes);
